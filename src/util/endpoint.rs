/// A host taken from configuration, with the scheme it was written with.
///
/// Values arrive in every shape people put in env files: `localhost:9000`,
/// `http://localhost:9000`, `https://minio.internal/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub scheme: Option<String>,
    pub authority: String,
}

impl Endpoint {
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (scheme, rest) = match raw.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, raw),
        };

        let authority = rest.split('/').next().unwrap_or("").to_string();
        if authority.is_empty() {
            return None;
        }

        Some(Endpoint { scheme, authority })
    }

    /// `Some(true)` for `https`, `Some(false)` for any other explicit scheme.
    pub fn is_tls(&self) -> Option<bool> {
        self.scheme.as_deref().map(|s| s == "https")
    }

    pub fn base_url(&self, secure: bool) -> String {
        let scheme = match &self.scheme {
            Some(scheme) => scheme.as_str(),
            None if secure => "https",
            None => "http",
        };

        format!("{}://{}", scheme, self.authority)
    }
}
