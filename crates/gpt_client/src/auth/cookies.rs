use reqwest::header::{HeaderMap, COOKIE, SET_COOKIE};
use reqwest::RequestBuilder;

/// Cookies collected over one login handshake.
///
/// Only `name=value` pairs are kept; attributes such as `Path` or `Expires`
/// are ignored because the jar never outlives the handshake.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CookieJar {
    cookies: Vec<(String, String)>,
}

fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let pair = raw.split(';').next()?;
    let (name, value) = pair.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge every `Set-Cookie` header of a response. Returns how many were taken.
    pub fn capture(&mut self, headers: &HeaderMap) -> usize {
        let mut taken = 0;
        for value in headers.get_all(SET_COOKIE) {
            let Ok(raw) = value.to_str() else {
                continue;
            };
            if let Some((name, value)) = parse_set_cookie(raw) {
                self.insert(name, value);
                taken += 1;
            }
        }
        taken
    }

    /// A later cookie with the same name replaces the earlier one.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.cookies.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.cookies.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }

    pub fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.header_value() {
            Some(value) => builder.header(COOKIE, value),
            None => builder,
        }
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn capture_keeps_name_value_and_drops_attributes() {
        let mut headers = HeaderMap::new();
        headers.append(
            SET_COOKIE,
            HeaderValue::from_static("did=abc123; Path=/; HttpOnly; Secure"),
        );
        headers.append(SET_COOKIE, HeaderValue::from_static("auth0=xyz; Max-Age=600"));
        headers.append(SET_COOKIE, HeaderValue::from_static("garbage"));

        let mut jar = CookieJar::new();
        assert_eq!(jar.capture(&headers), 2);
        assert_eq!(jar.get("did"), Some("abc123"));
        assert_eq!(
            jar.header_value().as_deref(),
            Some("did=abc123; auth0=xyz")
        );
    }

    #[test]
    fn later_cookie_replaces_earlier_value() {
        let mut jar = CookieJar::new();
        jar.insert("did", "first");
        jar.insert("other", "1");
        jar.insert("did", "second");

        assert_eq!(jar.len(), 2);
        assert_eq!(jar.header_value().as_deref(), Some("did=second; other=1"));
    }

    #[test]
    fn empty_jar_adds_no_header() {
        assert!(CookieJar::new().header_value().is_none());
    }
}
