use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput};

pub fn enum_all(input: TokenStream) -> TokenStream {
    let input: DeriveInput = syn::parse(input).expect("Unable to parse input");

    let type_ident = &input.ident;

    let Data::Enum(data) = &input.data else {
        panic!("EnumAll derive macro can only be applied to enums; {type_ident} is not an enum");
    };

    let variants: Vec<_> = data
        .variants
        .iter()
        .map(|variant| {
            let variant_ident = &variant.ident;
            assert!(
                variant.fields.is_empty(),
                "EnumAll only supports enums with fieldless variants; {type_ident}::{variant_ident} has fields"
            );

            quote! {
                Self::#variant_ident
            }
        })
        .collect();

    let num_variants = variants.len();
    let expanded = quote! {
        impl #type_ident {
            pub const ALL: [Self; #num_variants] = [#(#variants,)*];
        }
    };

    expanded.into()
}

pub fn enum_display(input: TokenStream) -> TokenStream {
    let input: DeriveInput = syn::parse(input).expect("Unable to parse input");

    let type_ident = &input.ident;

    let Data::Enum(data) = &input.data else {
        panic!("EnumDisplay derive macro can only be applied to enums; {type_ident} is not an enum");
    };

    let match_arms: Vec<_> = data
        .variants
        .iter()
        .map(|variant| {
            let variant_ident = &variant.ident;
            assert!(
                variant.fields.is_empty(),
                "EnumDisplay only supports enums with fieldless variants; {type_ident}::{variant_ident} has fields"
            );

            let variant_str = variant_ident.to_string();
            quote! {
                Self::#variant_ident => #variant_str
            }
        })
        .collect();

    let expanded = quote! {
        impl #type_ident {
            pub fn to_str(&self) -> &'static str {
                match self {
                    #(#match_arms,)*
                }
            }
        }

        impl ::std::fmt::Display for #type_ident {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                ::std::write!(f, "{}", self.to_str())
            }
        }
    };

    expanded.into()
}
