pub mod checksum_types;
pub mod encryption_types;
pub mod errors;
pub mod message_types;
pub mod pa_data_types;
pub mod princ_name_types;

pub use self::checksum_types::ChecksumType;
pub use self::encryption_types::EncryptionType;
pub use self::errors::KrbErrorCode;
pub use self::message_types::KrbMessageType;
pub use self::pa_data_types::PaDataType;
pub use self::princ_name_types::PrincipalNameType;
