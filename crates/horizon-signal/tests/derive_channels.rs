//! Integration tests for the #[derive(Channels)] macro.

use horizon_signal::{slot, sender_as, ChannelStore, Channels, Dispatcher, Signature, SignalError};
use parking_lot::Mutex;
use std::sync::Arc;

// Nullary, single-signature, and overloaded channels on one struct.
#[derive(Channels)]
#[channel(clicked)]
#[channel(value_changed: (i32,))]
#[channel(range_changed: (i32, i32) | (i32,) | ())]
struct TestSlider {
    name: &'static str,
    channels: ChannelStore,
}

impl TestSlider {
    fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            channels: ChannelStore::new(),
        })
    }
}

// Several channels in one attribute.
#[derive(Channels)]
#[channel(pressed, released, toggled: (bool,))]
pub struct TestToggle(ChannelStore);

impl TestToggle {
    fn new() -> Arc<Self> {
        Arc::new(Self(ChannelStore::new()))
    }
}

struct Readout {
    shown: Mutex<Vec<String>>,
}

impl Readout {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            shown: Mutex::new(Vec::new()),
        })
    }

    fn show_value(&self, value: i32) {
        self.shown.lock().push(value.to_string());
    }

    fn show_range(&self, low: i32, high: i32) {
        self.shown.lock().push(format!("{low}..{high}"));
    }
}

#[test]
fn test_channel_statics() {
    assert_eq!(TestSlider::clicked_channel().name(), Some("clicked"));
    assert_eq!(
        TestSlider::clicked_channel().signatures(),
        &[Signature::empty()]
    );
    assert_eq!(
        TestSlider::value_changed_channel().signatures(),
        &[Signature::of::<(i32,)>()]
    );
    assert_eq!(TestSlider::range_changed_channel().signatures().len(), 3);
    assert!(std::ptr::eq(
        TestSlider::clicked_channel(),
        TestSlider::clicked_channel()
    ));
}

#[test]
fn test_dispatcher_per_instance() {
    let a = TestSlider::new("a");
    let b = TestSlider::new("b");

    assert_eq!(a.clicked(), a.clicked());
    assert_ne!(a.clicked(), b.clicked());
    assert_ne!(a.clicked(), a.value_changed());
}

#[test]
fn test_connect_and_emit_through_accessor() {
    let slider = TestSlider::new("slider");
    let display = Readout::new();

    slider
        .value_changed()
        .connect(slot!(display, Readout::show_value))
        .unwrap();
    slider
        .range_changed()
        .connect(slot!(display, Readout::show_range))
        .unwrap();

    slider.value_changed().emit((5,)).unwrap();
    slider.range_changed().emit((1, 9)).unwrap();
    assert_eq!(*display.shown.lock(), vec!["5", "1..9"]);
}

#[test]
fn test_overloaded_channel_rejects_too_many_parameters() {
    let slider = TestSlider::new("slider");
    let err = slider
        .range_changed()
        .connect(|_a: i32, _b: i32, _c: i32| {})
        .unwrap_err();
    match err {
        SignalError::IncompatibleSignature {
            attempts, accepted, ..
        } => {
            assert_eq!(attempts.len(), 3);
            assert_eq!(accepted.len(), 3);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_sender_inside_slot() {
    let slider = TestSlider::new("source");
    let seen = Arc::new(Mutex::new(None));

    let seen_clone = seen.clone();
    slider
        .clicked()
        .connect(move || {
            *seen_clone.lock() = sender_as::<TestSlider>().map(|s| s.name);
        })
        .unwrap();

    slider.clicked().emit(()).unwrap();
    assert_eq!(*seen.lock(), Some("source"));
}

#[test]
fn test_grouped_attribute() {
    let toggle = TestToggle::new();
    let state = Arc::new(Mutex::new(false));

    let state_clone = state.clone();
    toggle
        .toggled()
        .connect(move |on: bool| *state_clone.lock() = on)
        .unwrap();
    toggle.toggled().emit((true,)).unwrap();

    assert!(*state.lock());
    assert_eq!(TestToggle::pressed_channel().name(), Some("pressed"));
    assert_eq!(TestToggle::released_channel().name(), Some("released"));
}

#[test]
fn test_dispatchers_live_in_owner() {
    let slider = TestSlider::new("slider");
    assert!(slider.channels.is_empty());
    slider.clicked();
    slider.value_changed();
    slider.clicked();
    assert_eq!(slider.channels.len(), 2);
    assert_eq!(TestSlider::clicked_channel().instance_count(), 0);
}

#[test]
fn test_dropping_owner_releases_slots() {
    let toggle = TestToggle::new();
    let payload = Arc::new(vec![0_u8; 1024]);

    let captured = payload.clone();
    toggle
        .pressed()
        .connect(move || {
            let _ = captured.len();
        })
        .unwrap();
    assert_eq!(Arc::strong_count(&payload), 2);

    drop(toggle);
    assert_eq!(Arc::strong_count(&payload), 1);
}

#[test]
fn test_handle_outliving_owner() {
    let toggle = TestToggle::new();
    let dispatcher: Dispatcher = toggle.pressed();
    dispatcher.connect(|| {}).unwrap();

    drop(toggle);
    assert!(dispatcher.owner().is_none());
    assert_eq!(dispatcher.len(), 1);

    let fresh = TestToggle::new();
    assert!(fresh.pressed().is_empty());
}
