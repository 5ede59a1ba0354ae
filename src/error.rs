use crate::asn1::constants::errors::KrbErrorCode;

/// Broad classification of a [`KrbError`], used by the request engine to decide
/// between aborting, renegotiating and handing a retry decision to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The encryption or checksum type is unknown or disabled by policy.
    Capability,
    /// Decryption or checksum verification failed.
    Integrity,
    /// The peer sent something out of order, stale, replayed or otherwise
    /// unexpected for the current protocol step.
    ProtocolSequence,
    /// Transport failures. These are retryable at the callers discretion.
    Resource,
    /// Missing or mismatched key material and other local setup faults.
    Configuration,
    /// Malformed messages that could not be encoded or decoded.
    Encoding,
}

#[derive(Debug)]
pub enum KrbError {
    // IMPORTANT: Don't add values to this enum - it's a potential security risk
    // as you can leak internal state in an error. If you want to debug the error,
    // then use the error! macro at the error raise site to report relevant information.
    //
    // The only exceptions are wrapped library errors and the error code and text a
    // remote KDC sent us, as those are already public.
    InvalidHmacKey,
    MessageAuthenticationFailed,
    InsufficientData,
    CtsCiphertextInvalid,
    InvalidBlockLength,
    InsecurePassphrase,

    UnsupportedEncryption,
    UnsupportedChecksumType,
    EncryptionDisabledByPolicy,

    KeyTypeMismatch,
    KvnoMismatch,
    InvalidEncryptionKey,
    MissingKeyMaterial,

    MissingPaData,
    MissingServiceNameWithRealm,
    MissingClientName,
    MissingRealm,

    DerDecodePaData,
    DerDecodeEtypeInfo2,
    DerDecodeAuthenticator,
    DerDecodeEncKdcRepPart,
    DerDecodeEncTicketPart,
    DerDecodeEncApRepPart,
    DerDecodeFastMessage,
    DerEncodeKerberosString,
    DerEncodeKerberosTime,
    DerError(der::Error),

    PreauthUnsupported,
    PreauthMissingEtypeInfo2,
    PreauthInvalidS2KParams,
    PreauthNoMechanismAvailable,
    PreauthInvalidStateTransition,
    PreauthMissingCredential,
    PreauthTokenInvalid,
    PreauthTokenExpired,
    PreauthFastRequired,
    PreauthDhInvalidPublicValue,
    PreauthFailed,

    ReplyNonceMismatch,
    ReplyClockSkew,
    ReplyNameMismatch,
    ReplyUnexpected,

    ApErrBadMatch,
    ApErrSkew,
    ApErrRepeat,
    ApErrTicketExpired,
    ApErrTicketNotYetValid,
    ApErrNoKey,
    ApErrBadIntegrity,
    ApErrModified,
    ApErrMutualFail,

    TgsMissingPaApReq,
    TgsAuthMissingChecksum,
    TgsAuthChecksumFailure,
    TgsTicketIsNotTgt,

    KdcClientUnknown,
    KdcServiceUnknown,
    KdcPrincipalExpired,
    KdcPolicyRejected,

    NameNotPrincipal,
    NameNumberOfComponents,
    PrincipalNameInvalidType,
    PrincipalNameParse,

    InvalidMessageType,
    InvalidPvno,
    InvalidEnumValue(String, i32),

    /// The KDC rejected the request. Carries the code and text the KDC sent.
    KdcError {
        code: KrbErrorCode,
        text: Option<String>,
    },

    TransportTimeout,
    TransportClosed,
    MessageTooLarge,
    IoError(std::io::Error),
    FromHexError(hex::FromHexError),
    JsonError(serde_json::Error),
    Base64Error(base64::DecodeError),
    TokenDecode,
    ConfigInvalid,

    /// No really, do you have a time machine? How did you go back to before 1970?
    DoYouHaveATimeMachine,
}

impl KrbError {
    pub fn class(&self) -> ErrorClass {
        match self {
            KrbError::UnsupportedEncryption
            | KrbError::UnsupportedChecksumType
            | KrbError::EncryptionDisabledByPolicy
            | KrbError::PreauthUnsupported => ErrorClass::Capability,

            KrbError::InvalidHmacKey
            | KrbError::MessageAuthenticationFailed
            | KrbError::CtsCiphertextInvalid
            | KrbError::InvalidBlockLength
            | KrbError::InsufficientData
            | KrbError::ApErrBadIntegrity
            | KrbError::ApErrModified
            | KrbError::ApErrMutualFail
            | KrbError::PreauthFailed
            | KrbError::TgsAuthChecksumFailure => ErrorClass::Integrity,

            KrbError::KeyTypeMismatch
            | KrbError::KvnoMismatch
            | KrbError::InvalidEncryptionKey
            | KrbError::MissingKeyMaterial
            | KrbError::ApErrNoKey
            | KrbError::InsecurePassphrase
            | KrbError::PreauthMissingCredential
            | KrbError::PreauthFastRequired
            | KrbError::ConfigInvalid
            | KrbError::FromHexError(_)
            | KrbError::DoYouHaveATimeMachine => ErrorClass::Configuration,

            KrbError::TransportTimeout
            | KrbError::TransportClosed
            | KrbError::IoError(_) => ErrorClass::Resource,

            KrbError::DerDecodePaData
            | KrbError::DerDecodeEtypeInfo2
            | KrbError::DerDecodeAuthenticator
            | KrbError::DerDecodeEncKdcRepPart
            | KrbError::DerDecodeEncTicketPart
            | KrbError::DerDecodeEncApRepPart
            | KrbError::DerDecodeFastMessage
            | KrbError::DerEncodeKerberosString
            | KrbError::DerEncodeKerberosTime
            | KrbError::DerError(_)
            | KrbError::MessageTooLarge
            | KrbError::TokenDecode
            | KrbError::JsonError(_)
            | KrbError::Base64Error(_)
            | KrbError::InvalidMessageType
            | KrbError::InvalidPvno
            | KrbError::InvalidEnumValue(_, _)
            | KrbError::NameNotPrincipal
            | KrbError::NameNumberOfComponents
            | KrbError::PrincipalNameInvalidType
            | KrbError::PrincipalNameParse
            | KrbError::MissingServiceNameWithRealm
            | KrbError::MissingClientName
            | KrbError::MissingRealm => ErrorClass::Encoding,

            _ => ErrorClass::ProtocolSequence,
        }
    }

    /// Resource errors may be retried by the caller with a fresh exchange.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Resource
    }

    /// The error code to present to a remote peer. Every integrity failure
    /// collapses to a single code so that a peer can't learn which check failed.
    pub fn to_kdc_error_code(&self) -> KrbErrorCode {
        match self {
            KrbError::KdcError { code, .. } => *code,
            KrbError::UnsupportedEncryption | KrbError::EncryptionDisabledByPolicy => {
                KrbErrorCode::KdcErrEtypeNosupp
            }
            KrbError::UnsupportedChecksumType => KrbErrorCode::KdcErrSumtypeNosupp,
            KrbError::PreauthUnsupported | KrbError::PreauthNoMechanismAvailable => {
                KrbErrorCode::KdcErrPadataTypeNosupp
            }
            KrbError::PreauthTokenInvalid
            | KrbError::PreauthTokenExpired
            | KrbError::PreauthFailed
            | KrbError::PreauthDhInvalidPublicValue
            | KrbError::TokenDecode
            | KrbError::JsonError(_)
            | KrbError::Base64Error(_) => KrbErrorCode::KdcErrPreauthFailed,
            KrbError::PreauthFastRequired => KrbErrorCode::KdcErrPolicy,
            KrbError::KdcClientUnknown => KrbErrorCode::KdcErrCPrincipalUnknown,
            KrbError::KdcServiceUnknown => KrbErrorCode::KdcErrSPrincipalUnknown,
            KrbError::KdcPrincipalExpired => KrbErrorCode::KdcErrNameExp,
            KrbError::KdcPolicyRejected => KrbErrorCode::KdcErrPolicy,
            KrbError::InvalidPvno => KrbErrorCode::KdcErrBadPvno,
            KrbError::ApErrMutualFail => KrbErrorCode::KrbApErrMutFail,
            KrbError::ApErrBadMatch => KrbErrorCode::KrbApErrBadmatch,
            KrbError::ApErrSkew | KrbError::ReplyClockSkew => KrbErrorCode::KrbApErrSkew,
            KrbError::ApErrRepeat => KrbErrorCode::KrbApErrRepeat,
            KrbError::ApErrTicketExpired => KrbErrorCode::KrbApErrTktExpired,
            KrbError::ApErrTicketNotYetValid => KrbErrorCode::KrbApErrTktNyv,
            KrbError::ApErrNoKey | KrbError::MissingKeyMaterial => KrbErrorCode::KrbApErrNokey,
            KrbError::ApErrModified => KrbErrorCode::KrbApErrModified,
            KrbError::TgsAuthMissingChecksum => KrbErrorCode::KrbApErrInappCksum,
            KrbError::TgsTicketIsNotTgt => KrbErrorCode::KdcErrPolicy,
            _ if self.class() == ErrorClass::Integrity => KrbErrorCode::KrbApErrBadIntegrity,
            _ => KrbErrorCode::KrbErrGeneric,
        }
    }
}

impl std::fmt::Display for KrbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KrbError::KdcError {
                code,
                text: Some(text),
            } => write!(f, "KDC returned {:?}: {}", code, text),
            KrbError::KdcError { code, text: None } => write!(f, "KDC returned {:?}", code),
            // Integrity failures are never described beyond this.
            e if e.class() == ErrorClass::Integrity => f.write_str("authentication failed"),
            e => write!(f, "{:?}", e),
        }
    }
}

impl std::error::Error for KrbError {}

impl From<der::Error> for KrbError {
    fn from(value: der::Error) -> Self {
        KrbError::DerError(value)
    }
}

impl From<std::io::Error> for KrbError {
    fn from(value: std::io::Error) -> Self {
        KrbError::IoError(value)
    }
}

impl From<hex::FromHexError> for KrbError {
    fn from(value: hex::FromHexError) -> Self {
        KrbError::FromHexError(value)
    }
}

impl From<serde_json::Error> for KrbError {
    fn from(value: serde_json::Error) -> Self {
        KrbError::JsonError(value)
    }
}

impl From<base64::DecodeError> for KrbError {
    fn from(value: base64::DecodeError) -> Self {
        KrbError::Base64Error(value)
    }
}

impl From<tokio::time::error::Elapsed> for KrbError {
    fn from(_value: tokio::time::error::Elapsed) -> Self {
        KrbError::TransportTimeout
    }
}
