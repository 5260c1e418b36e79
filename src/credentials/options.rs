//! # Generate Options
//!
//! `generate` takes an ordered list of [`GenerateOption`] values which are folded
//! into a [`GenerateOptions`] record. Options are applied in list order, so a
//! later option of the same kind overrides an earlier one.

/// How a changed config replaces its live record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationMode {
    /// Overwrite the payload of the fixed-name record; consumers refresh together
    InPlace,
    /// Create a new record and keep the previous one trusted as `old`
    KeepOld,
}

/// Issuing CA of a leaf certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerRef {
    pub name: String,
    /// Sign with the signer's retained old record instead of its current one
    pub use_old: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerateOption {
    /// Write the record to the store so it survives process restart
    Persist,
    Rotate(RotationMode),
    SignedByCa(SignerRef),
    /// Delete the retained old record of this config
    IgnoreOldSecrets,
    /// Label the record as temporary bootstrap material
    Bootstrap,
}

/// Resolved options of one `generate` call
///
/// Defaults: not persisted, content-addressed naming, unsigned, old records kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerateOptions {
    pub persist: bool,
    pub rotation: Option<RotationMode>,
    pub signer: Option<SignerRef>,
    pub ignore_old_secrets: bool,
    pub bootstrap: bool,
}

impl GenerateOptions {
    #[must_use]
    pub fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator<Item = GenerateOption>,
    {
        let mut resolved = Self::default();
        for option in options {
            resolved.apply(option);
        }
        resolved
    }

    pub fn apply(&mut self, option: GenerateOption) {
        match option {
            GenerateOption::Persist => self.persist = true,
            GenerateOption::Rotate(mode) => self.rotation = Some(mode),
            GenerateOption::SignedByCa(signer) => self.signer = Some(signer),
            GenerateOption::IgnoreOldSecrets => self.ignore_old_secrets = true,
            GenerateOption::Bootstrap => self.bootstrap = true,
        }
    }

    /// Fixed names are used only under in-place rotation
    #[must_use]
    pub fn fixed_name(&self) -> bool {
        self.rotation == Some(RotationMode::InPlace)
    }
}

#[must_use]
pub fn persist() -> GenerateOption {
    GenerateOption::Persist
}

#[must_use]
pub fn rotate(mode: RotationMode) -> GenerateOption {
    GenerateOption::Rotate(mode)
}

#[must_use]
pub fn signed_by_ca(signer: &str) -> GenerateOption {
    GenerateOption::SignedByCa(SignerRef {
        name: signer.to_string(),
        use_old: false,
    })
}

/// Sign with the signer's old record while a CA rotation is in flight
#[must_use]
pub fn signed_by_old_ca(signer: &str) -> GenerateOption {
    GenerateOption::SignedByCa(SignerRef {
        name: signer.to_string(),
        use_old: true,
    })
}

#[must_use]
pub fn ignore_old_secrets() -> GenerateOption {
    GenerateOption::IgnoreOldSecrets
}

#[must_use]
pub fn bootstrap() -> GenerateOption {
    GenerateOption::Bootstrap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = GenerateOptions::from_options([]);
        assert!(!options.persist);
        assert_eq!(options.rotation, None);
        assert!(!options.fixed_name());
    }

    #[test]
    fn test_later_options_override_earlier_ones() {
        let options = GenerateOptions::from_options([
            rotate(RotationMode::KeepOld),
            signed_by_ca("ca"),
            rotate(RotationMode::InPlace),
            signed_by_old_ca("ca-client"),
            persist(),
        ]);
        assert_eq!(options.rotation, Some(RotationMode::InPlace));
        assert!(options.fixed_name());
        assert_eq!(
            options.signer,
            Some(SignerRef {
                name: "ca-client".to_string(),
                use_old: true
            })
        );
        assert!(options.persist);
    }
}
