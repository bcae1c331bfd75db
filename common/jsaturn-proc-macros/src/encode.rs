use proc_macro::TokenStream;
use quote::quote;
use syn::DeriveInput;

// The fake bincode impls exist for things like cartridge ROMs and renderer scratch buffers that
// deliberately stay out of save states. None of those are generic, so rather than reconstructing
// generics for the three impl headers, these derives only accept plain types.
fn parse_non_generic(input: TokenStream, derive_name: &str) -> syn::Ident {
    let input: DeriveInput = syn::parse(input).expect("Unable to parse input");

    assert!(
        input.generics.params.is_empty(),
        "{derive_name} only supports non-generic types; {} has generic parameters",
        input.ident
    );

    input.ident
}

pub fn fake_encode(input: TokenStream) -> TokenStream {
    let type_ident = parse_non_generic(input, "FakeEncode");

    let expanded = quote! {
        impl ::bincode::Encode for #type_ident {
            fn encode<E: ::bincode::enc::Encoder>(
                &self,
                _encoder: &mut E
            ) -> ::std::result::Result<(), ::bincode::error::EncodeError> {
                ::std::result::Result::Ok(())
            }
        }
    };

    expanded.into()
}

pub fn fake_decode(input: TokenStream) -> TokenStream {
    let type_ident = parse_non_generic(input, "FakeDecode");

    // Both decode traits get the same do-nothing body
    let body = quote! {
        ::std::result::Result::Ok(Self::default())
    };

    let expanded = quote! {
        impl<Context> ::bincode::Decode<Context> for #type_ident {
            fn decode<D: ::bincode::de::Decoder<Context = Context>>(
                _decoder: &mut D
            ) -> ::std::result::Result<Self, ::bincode::error::DecodeError> {
                #body
            }
        }

        impl<'de, Context> ::bincode::BorrowDecode<'de, Context> for #type_ident {
            fn borrow_decode<D: ::bincode::de::BorrowDecoder<'de, Context = Context>>(
                _decoder: &mut D
            ) -> ::std::result::Result<Self, ::bincode::error::DecodeError> {
                #body
            }
        }
    };

    expanded.into()
}
