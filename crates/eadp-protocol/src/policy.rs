//! Cross-domain policy requests.
//!
//! Browser plugins probe a socket with an XML request before speaking to
//! it. Any line starting with `<` is answered with a policy document and
//! never reaches command validation.

/// Policy served when no policy file is configured.
pub const DEFAULT_POLICY: &str = r#"<?xml version="1.0"?>
<!DOCTYPE cross-domain-policy SYSTEM "http://www.adobe.com/xml/dtds/cross-domain-policy.dtd">
<cross-domain-policy>
  <site-control permitted-cross-domain-policies="master-only"/>
  <allow-access-from domain="*" to-ports="*"/>
</cross-domain-policy>"#;

/// Returns true if the line is a policy request.
pub fn is_policy_request(line: &str) -> bool {
    line.starts_with('<')
}

/// Normalizes a policy document for sending: surrounding whitespace is
/// stripped and no terminator is appended.
pub fn normalize_policy(document: &str) -> String {
    document.trim().to_string()
}
