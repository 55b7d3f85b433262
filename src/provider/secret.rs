//! Credential decryption.

use std::collections::BTreeMap;

use thiserror::Error;

use super::traits::Credentials;

/// Errors raised while decrypting credential fields.
///
/// Secret failures are never retried: the same input fails the same way.
#[derive(Debug, Error)]
pub enum SecretError {
    /// A referenced secret is not available.
    #[error("secret '{reference}' for field '{field}' is not available")]
    Missing { field: String, reference: String },

    /// The encrypted value is malformed.
    #[error("field '{field}' could not be decrypted: {reason}")]
    Malformed { field: String, reason: String },
}

/// Decrypts the encrypted credential fields of a job.
pub trait SecretResolver: Send + Sync + 'static {
    /// Decrypt one field.
    fn decrypt(&self, field: &str, value: &str) -> Result<String, SecretError>;

    /// Decrypt every field, failing on the first field that cannot be decrypted.
    fn decrypt_all(&self, fields: &BTreeMap<String, String>) -> Result<Credentials, SecretError> {
        let mut decrypted = BTreeMap::new();
        for (field, value) in fields {
            decrypted.insert(field.clone(), self.decrypt(field, value)?);
        }
        Ok(Credentials::new(decrypted))
    }
}

/// Resolves `${VAR}` references against the process environment.
///
/// Values without a reference are passed through unchanged. Unlike config
/// expansion there is no `:-default` form; a missing variable is an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecretResolver;

impl EnvSecretResolver {
    pub fn new() -> Self {
        Self
    }
}

impl SecretResolver for EnvSecretResolver {
    fn decrypt(&self, field: &str, value: &str) -> Result<String, SecretError> {
        static SECRET_REF_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

        let regex = SECRET_REF_REGEX.get_or_init(|| {
            regex::Regex::new(r"\$\{([^}]*)\}").expect("failed to compile secret ref regex")
        });

        let mut resolved = String::with_capacity(value.len());
        let mut last = 0;
        for caps in regex.captures_iter(value) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let name = name.as_str();
            let valid_name = name
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid_name {
                return Err(SecretError::Malformed {
                    field: field.to_string(),
                    reason: format!("invalid secret reference '{}'", whole.as_str()),
                });
            }

            let secret = std::env::var(name).map_err(|_| SecretError::Missing {
                field: field.to_string(),
                reference: name.to_string(),
            })?;
            resolved.push_str(&value[last..whole.start()]);
            resolved.push_str(&secret);
            last = whole.end();
        }
        resolved.push_str(&value[last..]);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_value_passes_through() {
        let resolver = EnvSecretResolver::new();
        assert_eq!(resolver.decrypt("user", "admin").unwrap(), "admin");
    }

    #[test]
    fn test_reference_resolved_from_env() {
        // SAFETY: This test runs in isolation and only modifies a test-specific variable.
        unsafe {
            std::env::set_var("DELEGATE_TEST_SECRET_OK", "s3cr3t");
        }
        let resolver = EnvSecretResolver::new();
        assert_eq!(
            resolver
                .decrypt("api_key", "Bearer ${DELEGATE_TEST_SECRET_OK}")
                .unwrap(),
            "Bearer s3cr3t"
        );
        // SAFETY: Cleanup test variable.
        unsafe {
            std::env::remove_var("DELEGATE_TEST_SECRET_OK");
        }
    }

    #[test]
    fn test_missing_reference_is_error() {
        let resolver = EnvSecretResolver::new();
        let err = resolver
            .decrypt("api_key", "${DELEGATE_TEST_SECRET_MISSING_9876}")
            .unwrap_err();
        assert!(matches!(err, SecretError::Missing { ref field, .. } if field == "api_key"));
    }

    #[test]
    fn test_malformed_reference_is_error() {
        let resolver = EnvSecretResolver::new();
        assert!(matches!(
            resolver.decrypt("api_key", "${1BAD}"),
            Err(SecretError::Malformed { .. })
        ));
    }

    #[test]
    fn test_decrypt_all() {
        let resolver = EnvSecretResolver::new();
        let fields = BTreeMap::from([
            ("user".to_string(), "admin".to_string()),
            ("region".to_string(), "us-east-1".to_string()),
        ]);
        let creds = resolver.decrypt_all(&fields).unwrap();
        assert_eq!(creds.get("user"), Some("admin"));
        assert_eq!(creds.get("region"), Some("us-east-1"));
    }
}
