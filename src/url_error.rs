/// Ways an otpauth URL can fail to decode.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum UrlError {
    Scheme(String),
    TypeLabel(String),
    EmptyIssuer,
    EmptyAccount,
    LabelDecoding(String),
    ValueDecoding(String),
    UnknownParameter(String),
    InvalidParameter(String, String),
}

impl std::error::Error for UrlError {}

impl std::fmt::Display for UrlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UrlError::Scheme(scheme) => write!(
                f,
                "Scheme should be otpauth, not \"{}\"",
                scheme
            ),
            UrlError::TypeLabel(s) => write!(
                f,
                "Expected TYPE/LABEL with both parts present, got \"{}\"",
                s
            ),
            UrlError::EmptyIssuer => write!(f, "Issuer before the colon in the label is empty"),
            UrlError::EmptyAccount => write!(f, "Account name in the label is empty"),
            UrlError::LabelDecoding(label) => write!(
                f,
                "Couldn't URL decode label \"{}\"",
                label
            ),
            UrlError::ValueDecoding(value) => write!(
                f,
                "Couldn't URL decode parameter value \"{}\"",
                value
            ),
            UrlError::UnknownParameter(name) => write!(
                f,
                "Unknown parameter \"{}\"",
                name
            ),
            UrlError::InvalidParameter(name, value) => write!(
                f,
                "Could not parse \"{}\" as a number for parameter \"{}\"",
                value,
                name,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::UrlError;

    #[test]
    fn scheme() {
        let error = UrlError::Scheme("https".to_string());
        assert_eq!(
            error.to_string(),
            "Scheme should be otpauth, not \"https\"".to_string()
        )
    }

    #[test]
    fn type_label() {
        let error = UrlError::TypeLabel("totp".to_string());
        assert_eq!(
            error.to_string(),
            "Expected TYPE/LABEL with both parts present, got \"totp\""
        )
    }

    #[test]
    fn empty_issuer() {
        assert_eq!(
            UrlError::EmptyIssuer.to_string(),
            "Issuer before the colon in the label is empty"
        )
    }

    #[test]
    fn empty_account() {
        assert_eq!(
            UrlError::EmptyAccount.to_string(),
            "Account name in the label is empty"
        )
    }

    #[test]
    fn label_decoding() {
        let error = UrlError::LabelDecoding("Laz%zziz".to_string());
        assert_eq!(
            error.to_string(),
            "Couldn't URL decode label \"Laz%zziz\"".to_string()
        )
    }

    #[test]
    fn unknown_parameter() {
        let error = UrlError::UnknownParameter("foo".to_string());
        assert_eq!(error.to_string(), "Unknown parameter \"foo\"".to_string())
    }

    #[test]
    fn invalid_parameter() {
        let error = UrlError::InvalidParameter("digits".to_string(), "six".to_string());
        assert_eq!(
            error.to_string(),
            "Could not parse \"six\" as a number for parameter \"digits\"".to_string()
        )
    }
}
