use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::{format_ident, quote};
use syn::{
    Attribute, Ident, LitStr, Result, Token, Type, parenthesized,
    parse::{Parse, ParseStream},
    parse_macro_input,
    punctuated::Punctuated,
};

/// One native entry point
struct Binding {
    attrs: Vec<Attribute>,
    name: Ident,
    args: Vec<(Ident, Type)>,
    ret: Type,
}

/// The full nt_syscalls input
struct Syscalls {
    module: LitStr,
    bindings: Vec<Binding>,
}

impl Parse for Syscalls {
    fn parse(input: ParseStream) -> Result<Self> {
        // module: "ntdll.dll";
        let module_kw: Ident = input.parse()?;
        if module_kw != "module" {
            return Err(syn::Error::new(module_kw.span(), "expected `module`"));
        }
        input.parse::<Token![:]>()?;
        let module: LitStr = input.parse()?;
        input.parse::<Token![;]>()?;

        let mut bindings = Vec::new();
        while !input.is_empty() {
            // #[doc] fn NtName(args) -> RetType;
            let attrs = input.call(Attribute::parse_outer)?;
            input.parse::<Token![fn]>()?;
            let name: Ident = input.parse()?;

            let args_content;
            parenthesized!(args_content in input);
            let args_parsed: Punctuated<(Ident, Type), Token![,]> = args_content.parse_terminated(
                |input| {
                    let name: Ident = input.parse()?;
                    input.parse::<Token![:]>()?;
                    let ty: Type = input.parse()?;
                    Ok((name, ty))
                },
                Token![,],
            )?;
            let args: Vec<_> = args_parsed.into_iter().collect();

            input.parse::<Token![->]>()?;
            let ret: Type = input.parse()?;
            input.parse::<Token![;]>()?;

            bindings.push(Binding {
                attrs,
                name,
                args,
                ret,
            });
        }

        if bindings.is_empty() {
            return Err(syn::Error::new(module.span(), "expected at least one `fn`"));
        }

        Ok(Syscalls { module, bindings })
    }
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

fn site_ident(binding: &Binding) -> Ident {
    format_ident!("{}_SITE", to_snake_case(&binding.name.to_string()).to_uppercase())
}

fn generate_binding(module: &LitStr, binding: &Binding) -> TokenStream2 {
    let attrs = &binding.attrs;
    let export = binding.name.to_string();
    let fn_name = format_ident!("{}", to_snake_case(&export));
    let site = site_ident(binding);
    let ret = &binding.ret;
    let arg_names: Vec<_> = binding.args.iter().map(|(name, _)| name).collect();
    let arg_types: Vec<_> = binding.args.iter().map(|(_, ty)| ty).collect();
    let count = binding.args.len();
    let doc = if attrs.is_empty() {
        let text = format!("Raw `{}`, resolved and cached on first use.", export);
        quote! { #[doc = #text] }
    } else {
        quote! { #(#attrs)* }
    };

    quote! {
        static #site: crate::transport::SyscallSite = crate::transport::SyscallSite::new(
            crate::hash::fnv1a_str(#module, true),
            crate::hash::fnv1a_str(#export, true),
        );

        #doc
        #[allow(clippy::too_many_arguments)]
        pub unsafe fn #fn_name(#(#arg_names: #arg_types),*) -> #ret {
            let args: [u64; #count] = [#(crate::IntoRegister::into_register(#arg_names)),*];
            ::core::convert::From::from(unsafe { #site.call::<crate::transport::Native>(&args) })
        }
    }
}

/// Declares native entry points of one module as lazily resolved raw bindings.
///
/// ```ignore
/// nt_syscalls! {
///     module: "ntdll.dll";
///
///     fn NtClose(handle: Handle) -> NtStatus;
/// }
/// ```
///
/// Each `fn` becomes a `pub unsafe fn nt_close(..)` backed by a
/// `SyscallSite` static, and the invocation also emits
/// `sites() -> &'static [(&'static str, &'static SyscallSite)]` listing every
/// binding. Argument types must implement `IntoRegister`; the return type
/// must implement `From<NtStatus>`.
#[proc_macro]
pub fn nt_syscalls(input: TokenStream) -> TokenStream {
    let syscalls = parse_macro_input!(input as Syscalls);
    let module = &syscalls.module;

    let bindings: Vec<_> = syscalls
        .bindings
        .iter()
        .map(|b| generate_binding(module, b))
        .collect();

    let table_entries: Vec<_> = syscalls
        .bindings
        .iter()
        .map(|b| {
            let export = b.name.to_string();
            let site = site_ident(b);
            quote! { (#export, &#site) }
        })
        .collect();

    let expanded = quote! {
        #(#bindings)*

        /// Every binding declared alongside this table, by export name
        pub fn sites() -> &'static [(&'static str, &'static crate::transport::SyscallSite)] {
            static SITES: &[(&str, &crate::transport::SyscallSite)] = &[#(#table_entries),*];
            SITES
        }
    };

    TokenStream::from(expanded)
}
