pub mod ap_options;
pub mod ap_rep;
pub mod ap_req;
pub mod authenticator;
pub mod authorization_data;
pub mod checksum;
pub mod constants;
pub mod enc_ap_rep_part;
pub mod enc_kdc_rep_part;
pub mod enc_ticket_part;
pub mod encrypted_data;
pub mod encryption_key;
pub mod etype_info2;
pub mod fast;
pub mod host_address;
pub mod kdc_rep;
pub mod kdc_req;
pub mod kdc_req_body;
pub mod kerberos_flags;
pub mod kerberos_string;
pub mod kerberos_time;
pub mod krb_error;
pub mod krb_kdc_rep;
pub mod krb_kdc_req;
pub mod last_req;
pub mod pa_data;
pub mod pa_enc_ts_enc;
pub mod pa_token;
pub mod pkinit;
pub mod principal_name;
pub mod realm;
pub mod tagged_enc_kdc_rep_part;
pub mod tagged_ticket;
pub mod ticket_flags;
pub mod transited_encoding;

pub(crate) type Microseconds = u32;

/// Decode the first value in `bytes` and ignore anything that follows it.
/// Block ciphers without ciphertext stealing leave zero padding behind the
/// plaintext, which `Decode::from_der` would reject as trailing data.
pub(crate) fn decode_padded<'a, T>(bytes: &'a [u8]) -> der::Result<T>
where
    T: der::Decode<'a, Error = der::Error>,
{
    let mut reader = der::SliceReader::new(bytes)?;
    T::decode(&mut reader)
}

/// Kerberos messages are wrapped in an explicit `[APPLICATION n]` tag around
/// an inner SEQUENCE. This generates the `FixedTag` / `DecodeValue` /
/// `EncodeValue` glue for a newtype over the inner sequence.
macro_rules! application_tagged {
    ($outer:ident, $inner:ty, $number:expr) => {
        impl ::der::FixedTag for $outer {
            const TAG: ::der::Tag = ::der::Tag::Application {
                constructed: true,
                number: ::der::TagNumber($number),
            };
        }

        impl<'a> ::der::DecodeValue<'a> for $outer {
            type Error = ::der::Error;

            fn decode_value<R: ::der::Reader<'a>>(
                reader: &mut R,
                _header: ::der::Header,
            ) -> ::der::Result<Self> {
                let inner: $inner = ::der::Decode::decode(reader)?;
                Ok(Self(inner))
            }
        }

        impl ::der::EncodeValue for $outer {
            fn value_len(&self) -> ::der::Result<::der::Length> {
                ::der::Encode::encoded_len(&self.0)
            }

            fn encode_value(&self, encoder: &mut impl ::der::Writer) -> ::der::Result<()> {
                ::der::Encode::encode(&self.0, encoder)
            }
        }
    };
}

pub(crate) use application_tagged;

/// Kerberos bit strings are always sent as at least 32 bits, with bit 0 being
/// the most significant bit of the first octet. `der::flagset` strips the
/// leading zeros so we provide the glue by hand for bitmask types.
macro_rules! kerberos_bit_string {
    ($flags:ident) => {
        impl $flags {
            pub(crate) fn from_bits(val: u32) -> Self {
                let mut tf = $flags::none();
                tf.bits = val;
                tf
            }
        }

        impl<'a> ::der::Decode<'a> for $flags {
            type Error = ::der::Error;

            fn decode<R: ::der::Reader<'a>>(decoder: &mut R) -> ::der::Result<Self> {
                let bs = <::der::asn1::BitStringRef as ::der::Decode>::decode(decoder)?;
                let raw = bs.raw_bytes();
                if raw.len() > 4 {
                    // Bits beyond the 32nd are unassigned and ignored.
                    ::tracing::trace!(len = raw.len(), "truncating kerberos flags");
                }
                let mut bytes = [0u8; 4];
                for (dst, src) in bytes.iter_mut().zip(raw.iter()) {
                    *dst = *src;
                }
                let bits = u32::from_be_bytes(bytes);
                Ok($flags::from_bits(bits.reverse_bits()))
            }
        }

        impl ::der::Tagged for $flags {
            fn tag(&self) -> ::der::Tag {
                ::der::Tag::BitString
            }
        }

        impl ::der::EncodeValue for $flags {
            fn value_len(&self) -> ::der::Result<::der::Length> {
                let buff = &self.bits().reverse_bits().to_be_bytes();
                let bs = ::der::asn1::BitStringRef::from_bytes(buff)?;
                ::der::EncodeValue::value_len(&bs)
            }

            fn encode_value(&self, encoder: &mut impl ::der::Writer) -> ::der::Result<()> {
                let buff = &self.bits().reverse_bits().to_be_bytes();
                let bs = ::der::asn1::BitStringRef::from_bytes(buff)?;
                ::der::EncodeValue::encode_value(&bs, encoder)
            }
        }
    };
}

pub(crate) use kerberos_bit_string;

/// A CHOICE whose only alternative is an explicit `[0]`. Encoded as a context
/// specific wrapper around the inner sequence.
macro_rules! context_zero_choice {
    ($outer:ident, $inner:ty) => {
        #[derive(Debug, Clone, Eq, PartialEq)]
        pub(crate) struct $outer(pub(crate) $inner);

        impl ::der::FixedTag for $outer {
            const TAG: ::der::Tag = ::der::Tag::ContextSpecific {
                constructed: true,
                number: ::der::TagNumber(0),
            };
        }

        impl<'a> ::der::DecodeValue<'a> for $outer {
            type Error = ::der::Error;

            fn decode_value<R: ::der::Reader<'a>>(
                reader: &mut R,
                _header: ::der::Header,
            ) -> ::der::Result<Self> {
                ::der::Decode::decode(reader).map($outer)
            }
        }

        impl ::der::EncodeValue for $outer {
            fn value_len(&self) -> ::der::Result<::der::Length> {
                ::der::Encode::encoded_len(&self.0)
            }

            fn encode_value(&self, encoder: &mut impl ::der::Writer) -> ::der::Result<()> {
                ::der::Encode::encode(&self.0, encoder)
            }
        }
    };
}

pub(crate) use context_zero_choice;

pub(crate) const fn application_tag(number: u32) -> der::Tag {
    der::Tag::Application {
        constructed: true,
        number: der::TagNumber(number),
    }
}

/// Length of `inner` once wrapped in an explicit `[APPLICATION number]` tag.
pub(crate) fn application_tagged_len(
    number: u32,
    inner: &impl der::Encode,
) -> der::Result<der::Length> {
    use der::Encode;
    let inner_len = inner.encoded_len()?;
    (application_tag(number).encoded_len()? + inner_len)? + inner_len.encoded_len()?
}

pub(crate) fn encode_application_tagged(
    number: u32,
    inner: &impl der::Encode,
    writer: &mut impl der::Writer,
) -> der::Result<()> {
    use der::Encode;
    application_tag(number).encode(writer)?;
    inner.encoded_len()?.encode(writer)?;
    inner.encode(writer)
}
