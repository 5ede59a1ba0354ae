use super::kerberos_string::KerberosString;
use crate::error::KrbError;
use der::Sequence;
use std::fmt;
use std::str::FromStr;

/// ```text
///   PrincipalName   ::= SEQUENCE {
///           name-type       [0] Int32,
///           name-string     [1] SEQUENCE OF KerberosString
///   }
/// ````
#[derive(Debug, Clone, Eq, PartialEq, Sequence)]
pub struct PrincipalName {
    // The name-type SHOULD be treated as a hint. Ignoring the name type, no two
    // names can be the same.
    #[asn1(context_specific = "0")]
    pub(crate) name_type: i32,
    #[asn1(context_specific = "1")]
    pub(crate) name_string: Vec<KerberosString>,
}

impl PrincipalName {
    /// Compare two names by their components only, as the name type is a hint.
    pub(crate) fn same_components(&self, other: &PrincipalName) -> bool {
        self.name_string == other.name_string
    }
}

impl fmt::Display for PrincipalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for component in self.name_string.iter() {
            if !first {
                f.write_str("/")?;
            }
            f.write_str(component.as_str())?;
            first = false;
        }
        Ok(())
    }
}

impl<T> TryFrom<(i32, T)> for PrincipalName
where
    T: AsRef<str>,
{
    type Error = KrbError;

    fn try_from((name_type, name_str): (i32, T)) -> Result<Self, Self::Error> {
        let name_string = name_str
            .as_ref()
            .split('/')
            .map(KerberosString::from_str)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name_type,
            name_string,
        })
    }
}
