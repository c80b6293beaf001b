use serde::{Deserialize, Serialize};

/// Certificate as enumerated by the signing device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub disk: String,
    pub path: String,
    pub name: String,
    /// Comma-separated `key=value` subject fields
    pub alias: String,
}

impl Certificate {
    pub fn info(&self) -> CertificateInfo {
        CertificateInfo::parse(&self.alias)
    }

    pub fn tin(&self) -> Option<String> {
        self.info().tin
    }
}

/// Subject fields promoted out of a certificate alias
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateInfo {
    pub tin: Option<String>,
    pub organization: Option<String>,
    pub full_name: Option<String>,
    pub pinfl: Option<String>,
    pub serial_number: Option<String>,
    pub valid_from: Option<String>,
    pub valid_to: Option<String>,
}

const TIN_OID: &str = "1.2.860.3.16.1.1";
const PINFL_OID: &str = "1.2.860.3.16.1.12";

impl CertificateInfo {
    /// Parse an alias such as `cn=ivanov,o=acme,1.2.860.3.16.1.1=123456789`
    pub fn parse(alias: &str) -> Self {
        let fields: Vec<(String, String)> = alias
            .split(',')
            .filter_map(|part| part.split_once('='))
            .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .collect();

        let field = |keys: &[&str]| {
            keys.iter().find_map(|wanted| {
                fields
                    .iter()
                    .find(|(key, _)| key == wanted)
                    .map(|(_, value)| value.clone())
            })
        };

        Self {
            tin: field(&[TIN_OID, "tin"]),
            organization: field(&["o"]),
            full_name: field(&["cn"]),
            pinfl: field(&[PINFL_OID, "uid", "pinfl"]),
            serial_number: field(&["serialnumber"]),
            valid_from: field(&["validfrom"]),
            valid_to: field(&["validto"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_alias_fields() {
        let info = CertificateInfo::parse(
            "cn=IVANOV IVAN,o=ACME LLC,1.2.860.3.16.1.1=301234567,serialnumber=7A1B, \
             validto=2027.01.01 00:00:00,uid=31234567890123",
        );
        assert_eq!(info.tin.as_deref(), Some("301234567"));
        assert_eq!(info.organization.as_deref(), Some("ACME LLC"));
        assert_eq!(info.full_name.as_deref(), Some("IVANOV IVAN"));
        assert_eq!(info.serial_number.as_deref(), Some("7A1B"));
        assert_eq!(info.valid_to.as_deref(), Some("2027.01.01 00:00:00"));
        assert_eq!(info.pinfl.as_deref(), Some("31234567890123"));
    }

    #[test]
    fn test_tin_falls_back_to_plain_key() {
        assert_eq!(CertificateInfo::parse("CN=x,TIN=111").tin.as_deref(), Some("111"));
        assert_eq!(CertificateInfo::parse("cn=x,o=y").tin, None);
    }

    #[test]
    fn test_garbage_alias_yields_empty_info() {
        assert_eq!(CertificateInfo::parse("no fields here"), CertificateInfo::default());
    }
}
