#![allow(non_snake_case)]

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned};

/// Turns a struct into an object owned by a logical device.
///
/// Injects `pub(crate) device: crate::device::DeviceRef` and implements the
/// sealed `DeviceObject` trait. With `#[DeviceObject(named)]` a
/// `name: String` field is injected as well, together with a `name()` getter.
#[proc_macro_attribute]
pub fn DeviceObject(attr: TokenStream, item: TokenStream) -> TokenStream {
    let named = match parse_options(attr) {
        Ok(named) => named,
        Err(e) => return e.to_compile_error().into(),
    };

    let input = parse_macro_input!(item as syn::ItemStruct);
    let ident = input.ident.clone();
    let generics = input.generics.clone();
    let (impl_generics, ty_generics, where_clause) = generics.split_for_impl();

    let mut output_struct = input.clone();

    let syn::Fields::Named(fields_named) = &mut output_struct.fields else {
        return syn::Error::new(
            output_struct.span(),
            "DeviceObject only supports structs with named fields",
        )
        .to_compile_error()
        .into();
    };

    let mut injected = vec!["device"];
    if named {
        injected.push("name");
    }
    for field in injected.iter() {
        if fields_named.named.iter().any(|f| f.ident.as_ref().is_some_and(|id| *id == *field)) {
            return syn::Error::new(
                fields_named.span(),
                format!("DeviceObject: struct already has a `{field}` field, the macro injects it"),
            )
            .to_compile_error()
            .into();
        }
    }

    let device_field: syn::Field = syn::parse_quote! {
        pub(crate) device: crate::device::DeviceRef
    };
    fields_named.named.push(device_field);

    let name_impl = if named {
        let name_field: syn::Field = syn::parse_quote! {
            pub(crate) name: ::std::string::String
        };
        fields_named.named.push(name_field);

        quote! {
            impl #impl_generics #ident #ty_generics #where_clause {
                #[inline]
                pub fn name(&self) -> &str { &self.name }
            }
        }
    } else {
        quote! {}
    };

    let expanded = quote! {
        #output_struct

        impl #impl_generics crate::device::sealed::Sealed for #ident #ty_generics #where_clause {}

        impl #impl_generics crate::device::DeviceObject for #ident #ty_generics #where_clause {
            #[inline]
            fn device(&self) -> &crate::device::DeviceRef { &self.device }
        }

        #name_impl
    };

    expanded.into()
}

fn parse_options(attr: TokenStream) -> Result<bool, syn::Error> {
    if attr.is_empty() {
        return Ok(false);
    }

    let ident: syn::Ident = syn::parse(attr)?;
    if ident == "named" {
        Ok(true)
    } else {
        Err(syn::Error::new(
            ident.span(),
            format!("DeviceObject: unknown option `{ident}`, expected `named`"),
        ))
    }
}
