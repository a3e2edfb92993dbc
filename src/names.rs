//! Secret and config naming
//!
//! Every persistent entry the controller touches lives in the cluster's
//! secret or config store under a common namespace. The names here are a
//! wire contract: renaming an entry family orphans everything an existing
//! deployment has already written.

use std::path::PathBuf;

/// Default namespace prefix for all managed entries.
pub const DEFAULT_NAMESPACE: &str = "ndi";

/// Constructs the namespaced names of every managed secret and config family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace(String);

impl Default for Namespace {
    fn default() -> Self {
        Namespace(DEFAULT_NAMESPACE.to_string())
    }
}

impl Namespace {
    pub fn new(ns: impl Into<String>) -> Self {
        Namespace(ns.into())
    }

    /// The namespace prefix itself.
    pub fn prefix(&self) -> &str {
        &self.0
    }

    /// Singleton secret holding the serialized ACME account: `<ns>.acct`.
    pub fn account_secret(&self) -> String {
        format!("{}.acct", self.0)
    }

    /// Path the account secret is mounted at inside the robot workload.
    pub fn account_secret_path(&self) -> PathBuf {
        PathBuf::from(format!("/run/secrets/{}", self.account_secret()))
    }

    /// Content-addressed proxy config secret: `<ns>.conf.<sha1-hex>`.
    pub fn conf_secret(&self, hash: &str) -> String {
        format!("{}.conf.{}", self.0, hash)
    }

    /// Versioned private-key family for one service: `<ns>.svc.<id>.key.`.
    pub fn svc_key_prefix(&self, service_id: &str) -> String {
        format!("{}.svc.{}.key.", self.0, service_id)
    }

    /// Versioned certificate family for one service: `<ns>.svc.<id>.crt.`.
    pub fn svc_crt_prefix(&self, service_id: &str) -> String {
        format!("{}.svc.{}.crt.", self.0, service_id)
    }

    /// Versioned DH parameter family: `<ns>.dhparam.`.
    pub fn dhparam_prefix(&self) -> String {
        format!("{}.dhparam.", self.0)
    }

    /// HTTP-01 key-authorization config for one token: `<ns>.challange.<token>`.
    ///
    /// "challange" is the spelling deployed clusters already contain; it must
    /// not be corrected.
    pub fn challenge_config(&self, token: &str) -> String {
        format!("{}.challange.{}", self.0, token)
    }

    /// Versioned cluster configuration family: `<ns>.config.`.
    pub fn config_prefix(&self) -> String {
        format!("{}.config.", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_namespace() {
        let ns = Namespace::default();
        assert_eq!(ns.prefix(), "ndi");
        assert_eq!(ns.account_secret(), "ndi.acct");
    }

    #[test]
    fn test_names_bit_exact() {
        let ns = Namespace::default();
        assert_eq!(ns.conf_secret("deadbeef"), "ndi.conf.deadbeef");
        assert_eq!(ns.svc_key_prefix("abc123"), "ndi.svc.abc123.key.");
        assert_eq!(ns.svc_crt_prefix("abc123"), "ndi.svc.abc123.crt.");
        assert_eq!(ns.dhparam_prefix(), "ndi.dhparam.");
        assert_eq!(ns.challenge_config("tok"), "ndi.challange.tok");
        assert_eq!(ns.config_prefix(), "ndi.config.");
    }

    #[test]
    fn test_account_secret_path() {
        let ns = Namespace::default();
        assert_eq!(
            ns.account_secret_path(),
            PathBuf::from("/run/secrets/ndi.acct")
        );
    }

    #[test]
    fn test_custom_namespace() {
        let ns = Namespace::new("staging");
        assert_eq!(ns.challenge_config("XYZ"), "staging.challange.XYZ");
    }
}
