//! Derive macros for `micro-api`.
//!
//! `#[derive(Bind)]` turns the `#[web("...")]` field attributes of a struct into a static
//! `FieldRule` table and a `Bind::bind` implementation reading each field through it.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr, parse_macro_input};

#[proc_macro_derive(Bind, attributes(web))]
pub fn derive_bind(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    expand(&input).unwrap_or_else(syn::Error::into_compile_error).into()
}

/// A parsed `#[web("...")]` attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Tag {
    Ignored,
    Field { key: Option<String>, required: bool, default: Option<String> },
}

/// `"-"`, `"name"`, `"name,required"` or `",default"`.
fn parse_tag(tag: &str) -> Tag {
    if tag == "-" {
        return Tag::Ignored;
    }

    let (name, rest) = tag.split_once(',').unwrap_or((tag, ""));
    let key = (!name.is_empty()).then(|| name.to_owned());
    match rest {
        "required" => Tag::Field { key, required: true, default: None },
        "" => Tag::Field { key, required: false, default: None },
        literal => Tag::Field { key, required: false, default: Some(literal.to_owned()) },
    }
}

fn field_tag(field: &syn::Field) -> syn::Result<Tag> {
    let mut tag = None;
    for attr in field.attrs.iter().filter(|attr| attr.path().is_ident("web")) {
        if tag.is_some() {
            return Err(syn::Error::new_spanned(attr, "duplicate `web` attribute"));
        }
        let lit: LitStr = attr.parse_args()?;
        tag = Some(parse_tag(&lit.value()));
    }
    Ok(tag.unwrap_or(Tag::Field { key: None, required: false, default: None }))
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(input, "`Bind` can only be derived for structs with named fields"));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(&data.fields, "`Bind` can only be derived for structs with named fields"));
    };

    let mut rules = Vec::with_capacity(fields.named.len());
    let mut inits = Vec::with_capacity(fields.named.len());

    for (index, field) in fields.named.iter().enumerate() {
        let Some(ident) = field.ident.as_ref() else {
            continue;
        };
        let name = ident.to_string();
        let name = name.strip_prefix("r#").unwrap_or(&name).to_owned();

        match field_tag(field)? {
            Tag::Ignored => {
                rules.push(quote! { ::micro_api::bind::FieldRule::new(#name, "").ignored() });
                inits.push(quote! { #ident: ::core::default::Default::default() });
            }
            Tag::Field { key, required, default } => {
                let key = key.unwrap_or_else(|| name.to_lowercase());
                let mut rule = quote! { ::micro_api::bind::FieldRule::new(#name, #key) };
                if required {
                    rule = quote! { #rule.required() };
                }
                if let Some(literal) = default {
                    rule = quote! { #rule.with_default(#literal) };
                }
                rules.push(rule);
                inits.push(quote! {
                    #ident: ::micro_api::bind::bind_field(values, &rules[#index], &mut errors)
                });
            }
        }
    }

    let ty = &input.ident;
    let count = rules.len();
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    Ok(quote! {
        impl #impl_generics ::micro_api::bind::Bind for #ty #ty_generics #where_clause {
            fn rules() -> &'static [::micro_api::bind::FieldRule] {
                static RULES: [::micro_api::bind::FieldRule; #count] = [#(#rules),*];
                &RULES
            }

            #[allow(unused_variables, reason = "records whose fields are all ignored never read the mapping")]
            fn bind(values: &::micro_api::Values) -> ::core::result::Result<Self, ::micro_api::bind::BindError> {
                let rules = <Self as ::micro_api::bind::Bind>::rules();
                let mut errors = ::micro_api::bind::BindError::new();
                let value = Self { #(#inits),* };
                errors.into_result(value)
            }
        }
    })
}
