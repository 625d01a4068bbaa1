//! Procedural macros for Horizon Signal.
//!
//! This crate provides `#[derive(Channels)]`, which declares the channels an
//! object can emit on.
//!
//! # Attributes
//!
//! ## `#[channel]`
//!
//! One or more per struct. Each entry names a channel and, optionally, the
//! signatures it accepts as tuple types separated by `|`:
//!
//! ```ignore
//! #[derive(Channels)]
//! #[channel(clicked)]
//! #[channel(value_changed: (i32,))]
//! #[channel(range_changed: (i32, i32) | (i32,) | ())]
//! struct Slider;
//! ```
//!
//! Several channels may share one attribute, separated by commas:
//!
//! ```ignore
//! #[channel(pressed, released, toggled: (bool,))]
//! ```
//!
//! ## Storage field
//!
//! The struct must have exactly one field of type `ChannelStore`. It holds
//! the instance's dispatchers, so connected slots are dropped together with
//! the instance:
//!
//! ```ignore
//! #[derive(Channels)]
//! #[channel(clicked)]
//! struct Button {
//!     label: String,
//!     channels: ChannelStore,
//! }
//! ```

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Fields, Ident, Index, Member, Token, Type};

/// Derive per-instance channel accessors.
///
/// For every channel `foo` this generates, on the struct:
/// - `fn foo_channel() -> &'static Channel`, a lazily created static channel
///   named `"foo"`;
/// - `fn foo(self: &Arc<Self>) -> Dispatcher`, the dispatcher bound to this
///   instance, kept in the struct's `ChannelStore` field.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use horizon_signal::{ChannelStore, Channels};
///
/// #[derive(Channels)]
/// #[channel(value_changed: (i32,))]
/// struct Slider {
///     channels: ChannelStore,
/// }
///
/// let slider = Arc::new(Slider { channels: ChannelStore::new() });
/// slider.value_changed().connect(|v: i32| println!("{v}")).unwrap();
/// slider.value_changed().emit((3,)).unwrap();
/// ```
#[proc_macro_derive(Channels, attributes(channel))]
pub fn derive_channels(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match impl_derive_channels(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// One parsed channel declaration.
struct ChannelDecl {
    name: Ident,
    signatures: Vec<Type>,
}

impl Parse for ChannelDecl {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name: Ident = input.parse()?;
        let mut signatures = Vec::new();

        if input.peek(Token![:]) {
            input.parse::<Token![:]>()?;
            let alternatives = Punctuated::<Type, Token![|]>::parse_separated_nonempty(input)?;
            for ty in alternatives {
                validate_signature(&ty)?;
                signatures.push(ty);
            }
        }

        Ok(Self { name, signatures })
    }
}

/// Signatures are tuple types, so that `(i32,)` and `i32` cannot be confused.
fn validate_signature(ty: &Type) -> syn::Result<()> {
    match ty {
        Type::Tuple(_) => Ok(()),
        Type::Paren(paren) => {
            let inner = &paren.elem;
            Err(syn::Error::new_spanned(
                ty,
                format!(
                    "channel signatures are tuples; write `({},)` for a single parameter",
                    quote!(#inner)
                ),
            ))
        }
        _ => Err(syn::Error::new_spanned(
            ty,
            format!(
                "channel signatures are tuples; write `({},)` for a single parameter",
                quote!(#ty)
            ),
        )),
    }
}

fn impl_derive_channels(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let struct_name = &input.ident;
    let vis = &input.vis;

    let fields = match &input.data {
        Data::Struct(data) => &data.fields,
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Channels derive only supports structs",
            ))
        }
    };
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Channels derive does not support generic structs; each channel is a single static",
        ));
    }

    let channels = parse_channel_attrs(&input.attrs)?;
    if channels.is_empty() {
        return Err(syn::Error::new_spanned(
            struct_name,
            "Channels derive requires at least one #[channel(...)] attribute",
        ));
    }

    let store = find_store_field(fields).ok_or_else(|| {
        syn::Error::new_spanned(
            struct_name,
            "Channels derive requires exactly one field of type `ChannelStore`",
        )
    })?;

    let accessors = channels.iter().enumerate().map(|(index, channel)| {
        let name = &channel.name;
        let name_str = name.to_string();
        let channel_fn = format_ident!("{}_channel", name);
        let signatures = generate_signatures(&channel.signatures);
        let doc_channel = format!("The `{name_str}` channel declared on [`{struct_name}`].");
        let doc_dispatcher = format!("The `{name_str}` dispatcher of this instance.");

        quote! {
            #[doc = #doc_channel]
            #vis fn #channel_fn() -> &'static ::horizon_signal::Channel {
                static CHANNEL: ::std::sync::LazyLock<::horizon_signal::Channel> =
                    ::std::sync::LazyLock::new(|| {
                        ::horizon_signal::Channel::new(#signatures).named(#name_str)
                    });
                &CHANNEL
            }

            #[doc = #doc_dispatcher]
            #vis fn #name(self: &::std::sync::Arc<Self>) -> ::horizon_signal::Dispatcher {
                self.#store.dispatcher(#index, Self::#channel_fn(), self)
            }
        }
    });

    Ok(quote! {
        impl #struct_name {
            #(#accessors)*
        }
    })
}

/// The single field whose type is `ChannelStore`, by name or index.
fn find_store_field(fields: &Fields) -> Option<Member> {
    let mut found = fields.iter().enumerate().filter(|(_, field)| is_store_type(&field.ty));
    let (index, field) = found.next()?;
    if found.next().is_some() {
        return None;
    }
    Some(match &field.ident {
        Some(ident) => Member::Named(ident.clone()),
        None => Member::Unnamed(Index::from(index)),
    })
}

fn is_store_type(ty: &Type) -> bool {
    match ty {
        Type::Path(type_path) => type_path
            .path
            .segments
            .last()
            .is_some_and(|segment| segment.ident == "ChannelStore"),
        _ => false,
    }
}

/// Parse every `#[channel(...)]` attribute, rejecting duplicate names.
fn parse_channel_attrs(attrs: &[Attribute]) -> syn::Result<Vec<ChannelDecl>> {
    let mut channels: Vec<ChannelDecl> = Vec::new();

    for attr in attrs {
        if !attr.path().is_ident("channel") {
            continue;
        }

        let decls =
            attr.parse_args_with(Punctuated::<ChannelDecl, Token![,]>::parse_terminated)?;
        for decl in decls {
            if channels.iter().any(|existing| existing.name == decl.name) {
                return Err(syn::Error::new_spanned(
                    &decl.name,
                    format!("channel `{}` is declared more than once", decl.name),
                ));
            }
            channels.push(decl);
        }
    }

    Ok(channels)
}

/// Generate the argument passed to `Channel::new`.
fn generate_signatures(signatures: &[Type]) -> TokenStream2 {
    if signatures.is_empty() {
        return quote! { () };
    }
    let entries = signatures
        .iter()
        .map(|ty| quote! { ::horizon_signal::Signature::of::<#ty>() });
    quote! { ::std::vec![#(#entries),*] }
}
