// Cipher and key-exchange lists
//
// The defaults widen russh's set with the CBC ciphers and SHA-1
// Diffie-Hellman groups older network gear still speaks. An ordered
// allow-list from the configuration moves the named algorithms to the front;
// the remaining supported ones follow in default order.

use russh::{cipher, kex, Preferred};

/// Ciphers offered to servers, most preferred first.
pub const SUPPORTED_CIPHERS: &[(&str, cipher::Name)] = &[
    ("chacha20-poly1305@openssh.com", cipher::CHACHA20_POLY1305),
    ("aes256-gcm@openssh.com", cipher::AES_256_GCM),
    ("aes256-ctr", cipher::AES_256_CTR),
    ("aes192-ctr", cipher::AES_192_CTR),
    ("aes128-ctr", cipher::AES_128_CTR),
    ("aes256-cbc", cipher::AES_256_CBC),
    ("aes192-cbc", cipher::AES_192_CBC),
    ("aes128-cbc", cipher::AES_128_CBC),
];

/// Key exchanges offered to servers, most preferred first.
pub const SUPPORTED_KEY_EXCHANGES: &[(&str, kex::Name)] = &[
    ("curve25519-sha256", kex::CURVE25519),
    ("curve25519-sha256@libssh.org", kex::CURVE25519_PRE_RFC_8731),
    ("diffie-hellman-group14-sha256", kex::DH_G14_SHA256),
    ("diffie-hellman-group14-sha1", kex::DH_G14_SHA1),
    ("diffie-hellman-group1-sha1", kex::DH_G1_SHA1),
];

/// Pseudo key exchanges that signal extensions; always offered last.
const KEX_EXTENSIONS: &[kex::Name] = &[
    kex::EXTENSION_SUPPORT_AS_CLIENT,
    kex::EXTENSION_OPENSSH_STRICT_KEX_AS_CLIENT,
];

/// Resolved algorithm order, built once at startup.
#[derive(Debug, Clone)]
pub struct SshAlgorithms {
    ciphers: &'static [cipher::Name],
    key_exchanges: &'static [kex::Name],
    cipher_names: Vec<&'static str>,
    kex_names: Vec<&'static str>,
}

impl SshAlgorithms {
    /// Build the lists, putting the configured names first.
    ///
    /// Unknown names are skipped with a warning.
    pub fn new(cipher_order: &[String], kex_order: &[String]) -> Self {
        let ciphers = reorder(SUPPORTED_CIPHERS, cipher_order, "cipher");
        let kexes = reorder(SUPPORTED_KEY_EXCHANGES, kex_order, "key exchange");

        let cipher_names = ciphers.iter().map(|(n, _)| *n).collect();
        let kex_names = kexes.iter().map(|(n, _)| *n).collect();

        let cipher_list: Vec<cipher::Name> = ciphers.into_iter().map(|(_, c)| c).collect();
        let mut kex_list: Vec<kex::Name> = kexes.into_iter().map(|(_, k)| k).collect();
        kex_list.extend_from_slice(KEX_EXTENSIONS);

        // Lives for the whole process; built once per configuration.
        Self {
            ciphers: Box::leak(cipher_list.into_boxed_slice()),
            key_exchanges: Box::leak(kex_list.into_boxed_slice()),
            cipher_names,
            kex_names,
        }
    }

    pub fn cipher_names(&self) -> &[&'static str] {
        &self.cipher_names
    }

    pub fn kex_names(&self) -> &[&'static str] {
        &self.kex_names
    }

    pub fn preferred(&self) -> Preferred {
        Preferred {
            kex: self.key_exchanges.into(),
            cipher: self.ciphers.into(),
            ..Default::default()
        }
    }
}

impl Default for SshAlgorithms {
    fn default() -> Self {
        Self::new(&[], &[])
    }
}

fn reorder<T: Copy>(
    supported: &[(&'static str, T)],
    order: &[String],
    kind: &str,
) -> Vec<(&'static str, T)> {
    let mut result: Vec<(&'static str, T)> = Vec::with_capacity(supported.len());
    for wanted in order {
        let wanted = wanted.trim();
        if wanted.is_empty() {
            continue;
        }
        match supported.iter().find(|(name, _)| name.eq_ignore_ascii_case(wanted)) {
            Some(entry) if !result.iter().any(|(n, _)| *n == entry.0) => result.push(*entry),
            Some(_) => {}
            None => log::warn!("Ignoring unsupported SSH {} {:?}", kind, wanted),
        }
    }
    for entry in supported {
        if !result.iter().any(|(n, _)| *n == entry.0) {
            result.push(*entry);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_order() {
        let algs = SshAlgorithms::default();
        assert_eq!(algs.cipher_names().len(), SUPPORTED_CIPHERS.len());
        assert_eq!(algs.cipher_names()[0], "chacha20-poly1305@openssh.com");
        assert!(algs.cipher_names().contains(&"aes128-cbc"));
        assert!(algs.kex_names().contains(&"diffie-hellman-group1-sha1"));
        assert_eq!(
            algs.preferred().kex.len(),
            SUPPORTED_KEY_EXCHANGES.len() + KEX_EXTENSIONS.len()
        );
    }

    #[test]
    fn test_configured_names_first() {
        let algs = SshAlgorithms::new(
            &names(&["aes128-cbc", "arcfour", "AES256-CTR", "aes128-cbc"]),
            &names(&["diffie-hellman-group1-sha1"]),
        );
        assert_eq!(&algs.cipher_names()[..2], &["aes128-cbc", "aes256-ctr"]);
        assert_eq!(algs.cipher_names().len(), SUPPORTED_CIPHERS.len());
        assert_eq!(algs.kex_names()[0], "diffie-hellman-group1-sha1");
        assert_eq!(algs.kex_names().len(), SUPPORTED_KEY_EXCHANGES.len());
    }
}
