use num_enum::{IntoPrimitive, TryFromPrimitive};

/// RFC 4120 section 7.5.9 and RFC 6113 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum KrbErrorCode {
    KdcErrNone = 0,
    KdcErrNameExp = 1,
    KdcErrServiceExp = 2,
    KdcErrBadPvno = 3,
    KdcErrCOldMastKvno = 4,
    KdcErrSOldMastKvno = 5,
    KdcErrCPrincipalUnknown = 6,
    KdcErrSPrincipalUnknown = 7,
    KdcErrPrincipalNotUnique = 8,
    KdcErrNullKey = 9,
    KdcErrCannotPostdate = 10,
    KdcErrNeverValid = 11,
    KdcErrPolicy = 12,
    KdcErrBadoption = 13,
    KdcErrEtypeNosupp = 14,
    KdcErrSumtypeNosupp = 15,
    KdcErrPadataTypeNosupp = 16,
    KdcErrTrtypeNosupp = 17,
    KdcErrClientRevoked = 18,
    KdcErrServiceRevoked = 19,
    KdcErrTgtRevoked = 20,
    KdcErrClientNotyet = 21,
    KdcErrServiceNotyet = 22,
    KdcErrKeyExpired = 23,
    KdcErrPreauthFailed = 24,
    KdcErrPreauthRequired = 25,
    KdcErrServerNomatch = 26,
    KdcErrMustUseUser2user = 27,
    KdcErrPathNotAccepted = 28,
    KdcErrSvcUnavailable = 29,
    KrbApErrBadIntegrity = 31,
    KrbApErrTktExpired = 32,
    KrbApErrTktNyv = 33,
    KrbApErrRepeat = 34,
    KrbApErrNotUs = 35,
    KrbApErrBadmatch = 36,
    KrbApErrSkew = 37,
    KrbApErrBadaddr = 38,
    KrbApErrBadversion = 39,
    KrbApErrMsgType = 40,
    KrbApErrModified = 41,
    KrbApErrBadorder = 42,
    KrbApErrBadkeyver = 44,
    KrbApErrNokey = 45,
    KrbApErrMutFail = 46,
    KrbApErrBaddirection = 47,
    KrbApErrMethod = 48,
    KrbApErrBadseq = 49,
    KrbApErrInappCksum = 50,
    KrbApPathNotAccepted = 51,
    KrbErrResponseTooBig = 52,
    KrbErrGeneric = 60,
    KrbErrFieldToolong = 61,
    KdcErrClientNotTrusted = 62,
    KdcErrKdcNotTrusted = 63,
    KdcErrInvalidSig = 64,
    KdcErrKeyTooWeak = 65,
    KdcErrCertificateMismatch = 66,
    KrbApErrNoTgt = 67,
    KdcErrWrongRealm = 68,
    KrbApErrUserToUserRequired = 69,
    KdcErrCantVerifyCertificate = 70,
    KdcErrInvalidCertificate = 71,
    KdcErrRevokedCertificate = 72,
    KdcErrRevocationStatusUnknown = 73,
    KdcErrRevocationStatusUnavailable = 74,
    KdcErrClientNameMismatch = 75,
    KdcErrKdcNameMismatch = 76,
    KdcErrUnknownCriticalFastOptions = 93,
    KdcErrMorePreauthDataRequired = 91,
}
