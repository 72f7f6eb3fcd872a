//! Implementation of the `#[transactional]` attribute macro.

use proc_macro2::{Span, TokenStream};
use quote::quote;
use syn::{ItemFn, ReturnType};

pub(crate) fn transactional_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    if !attr.is_empty() {
        return syn::Error::new(Span::call_site(), "#[transactional] takes no arguments")
            .to_compile_error();
    }
    let mut function: ItemFn = match syn::parse2(item) {
        Ok(function) => function,
        Err(e) => return e.to_compile_error(),
    };
    if function.sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            function.sig.fn_token,
            "#[transactional] only supports async functions",
        )
        .to_compile_error();
    }

    let name = function.sig.ident.to_string();
    let output = match &function.sig.output {
        ReturnType::Default => quote!(()),
        ReturnType::Type(_, ty) => quote!(#ty),
    };
    let body = &function.block;
    let wrapped: syn::Block = syn::parse_quote! {{
        let __txfixture_context = ::txfixture::__private::enter_marked(#name).await;
        let __txfixture_result: #output = async move #body.await;
        ::txfixture::__private::exit_marked(#name, __txfixture_context).await;
        __txfixture_result
    }};
    *function.block = wrapped;

    quote!(#function)
}
