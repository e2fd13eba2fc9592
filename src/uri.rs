//! Connection URI construction.
//!
//! ```text
//! mongodb://[username[:password]@]host:port[,host:port...]/database[?key=value&...]
//! ```

use url::form_urlencoded;

use crate::config::ConnectionParameters;

const SCHEME: &str = "mongodb://";
const MASK: &str = "****";

/// Build the connection URI for `params`.
///
/// ```rust
/// use mongo_lifecycle::{ConnectionParameters, uri::make_connection_uri};
///
/// let params = ConnectionParameters::new("localhost", "testdb");
/// assert_eq!(make_connection_uri(&params), "mongodb://localhost:27017/testdb");
/// ```
pub fn make_connection_uri(params: &ConnectionParameters) -> String {
    build(params, false)
}

/// Same as [`make_connection_uri`] with the password replaced by `****`.
pub fn redacted_connection_uri(params: &ConnectionParameters) -> String {
    build(params, true)
}

fn build(params: &ConnectionParameters, redact: bool) -> String {
    let mut uri = String::from(SCHEME);

    if let Some(ref username) = params.username {
        uri.push_str(&encode_userinfo(username));
        if let Some(ref password) = params.password {
            uri.push(':');
            if redact {
                uri.push_str(MASK);
            } else {
                uri.push_str(&encode_userinfo(password));
            }
        }
        uri.push('@');
    }

    let hosts = std::iter::once(format!("{}:{}", params.host, params.port))
        .chain(
            params
                .extras
                .iter()
                .map(|extra| format!("{}:{}", extra.host, extra.port_or_default())),
        )
        .collect::<Vec<_>>();
    uri.push_str(&hosts.join(","));

    uri.push('/');
    uri.push_str(&params.database);

    if !params.options.is_empty() {
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params.options.iter())
            .finish();
        uri.push('?');
        uri.push_str(&query);
    }

    uri
}

// `byte_serialize` writes spaces as '+', which the driver would read literally
// in the userinfo section.
fn encode_userinfo(value: &str) -> String {
    form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
