//! # Subsystem Toggles
//!
//! The eight process groups a stage can switch on:
//!
//! | Toggle | Process group | Requires |
//! |--------|---------------|----------|
//! | `env` | soil/snow thermal and hydrologic state | - |
//! | `bgc` | carbon and nitrogen cycling | - |
//! | `nfeed` | nitrogen-limited plant uptake | `bgc` |
//! | `avlnflg` | open inorganic nitrogen inputs/losses | `bgc` |
//! | `baseline` | soil C:N adjustment from N inputs/losses | `bgc` |
//! | `dsb` | disturbance (fire) | - |
//! | `dsl` | dynamic soil layer thickness and count | - |
//! | `dyn_lai` | LAI computed from leaf carbon | - |
//!
//! The nitrogen switches live inside [`NitrogenCoupling`], which only exists
//! when `bgc` is on, so a "nitrogen feedback without biogeochemistry" value
//! cannot be built.

use crate::TundraError;
use serde::{Deserialize, Serialize};

/// Nitrogen process switches, meaningful only under `bgc`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NitrogenCoupling {
    pub nfeed: bool,
    pub avlnflg: bool,
    pub baseline: bool,
}

/// Flat record of the eight toggles, as they appear in configuration.
///
/// The default is the least active setting: only `env` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToggleFlags {
    pub env: bool,
    pub bgc: bool,
    pub nfeed: bool,
    pub avlnflg: bool,
    pub baseline: bool,
    pub dsb: bool,
    pub dsl: bool,
    pub dyn_lai: bool,
}

impl Default for ToggleFlags {
    fn default() -> Self {
        Self {
            env: true,
            bgc: false,
            nfeed: false,
            avlnflg: false,
            baseline: false,
            dsb: false,
            dsl: false,
            dyn_lai: false,
        }
    }
}

impl ToggleFlags {
    fn any_enabled(&self) -> bool {
        self.env
            || self.bgc
            || self.nfeed
            || self.avlnflg
            || self.baseline
            || self.dsb
            || self.dsl
            || self.dyn_lai
    }
}

/// Validated set of subsystem toggles for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubsystemToggles {
    env: bool,
    bgc: Option<NitrogenCoupling>,
    dsb: bool,
    dsl: bool,
    dyn_lai: bool,
}

impl Default for SubsystemToggles {
    fn default() -> Self {
        Self::env_only()
    }
}

impl SubsystemToggles {
    /// Only the environmental module.
    #[must_use]
    pub const fn env_only() -> Self {
        Self {
            env: true,
            bgc: None,
            dsb: false,
            dsl: false,
            dyn_lai: false,
        }
    }

    /// Validate a flat toggle record.
    ///
    /// Every violated rule is reported, joined into one message.
    pub fn from_flags(flags: ToggleFlags) -> Result<Self, TundraError> {
        let mut problems = Vec::new();

        if !flags.any_enabled() {
            problems.push("no subsystem enabled".to_string());
        }
        if !flags.bgc {
            for (name, on) in [
                ("nfeed", flags.nfeed),
                ("avlnflg", flags.avlnflg),
                ("baseline", flags.baseline),
            ] {
                if on {
                    problems.push(format!("{} requires bgc", name));
                }
            }
        }
        if !problems.is_empty() {
            return Err(TundraError::Configuration(problems.join("; ")));
        }

        let bgc = flags.bgc.then_some(NitrogenCoupling {
            nfeed: flags.nfeed,
            avlnflg: flags.avlnflg,
            baseline: flags.baseline,
        });

        Ok(Self {
            env: flags.env,
            bgc,
            dsb: flags.dsb,
            dsl: flags.dsl,
            dyn_lai: flags.dyn_lai,
        })
    }

    /// Flatten back to the configuration record.
    #[must_use]
    pub fn flags(&self) -> ToggleFlags {
        let n = self.bgc.unwrap_or_default();
        ToggleFlags {
            env: self.env,
            bgc: self.bgc.is_some(),
            nfeed: n.nfeed,
            avlnflg: n.avlnflg,
            baseline: n.baseline,
            dsb: self.dsb,
            dsl: self.dsl,
            dyn_lai: self.dyn_lai,
        }
    }

    #[must_use]
    pub const fn env(&self) -> bool {
        self.env
    }

    #[must_use]
    pub const fn bgc(&self) -> bool {
        self.bgc.is_some()
    }

    /// Nitrogen switches, present only when `bgc` is on.
    #[must_use]
    pub const fn nitrogen(&self) -> Option<NitrogenCoupling> {
        self.bgc
    }

    #[must_use]
    pub fn nfeed(&self) -> bool {
        self.bgc.is_some_and(|n| n.nfeed)
    }

    #[must_use]
    pub fn avlnflg(&self) -> bool {
        self.bgc.is_some_and(|n| n.avlnflg)
    }

    #[must_use]
    pub fn baseline(&self) -> bool {
        self.bgc.is_some_and(|n| n.baseline)
    }

    #[must_use]
    pub const fn dsb(&self) -> bool {
        self.dsb
    }

    #[must_use]
    pub const fn dsl(&self) -> bool {
        self.dsl
    }

    #[must_use]
    pub const fn dyn_lai(&self) -> bool {
        self.dyn_lai
    }
}

impl std::fmt::Display for SubsystemToggles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let flags = self.flags();
        let names: Vec<&str> = [
            ("env", flags.env),
            ("bgc", flags.bgc),
            ("nfeed", flags.nfeed),
            ("avlnflg", flags.avlnflg),
            ("baseline", flags.baseline),
            ("dsb", flags.dsb),
            ("dsl", flags.dsl),
            ("dyn_lai", flags.dyn_lai),
        ]
        .into_iter()
        .filter_map(|(name, on)| on.then_some(name))
        .collect();
        write!(f, "{}", names.join(","))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_env_only() {
        let toggles = SubsystemToggles::from_flags(ToggleFlags::default()).expect("valid");
        assert_eq!(toggles, SubsystemToggles::env_only());
        assert_eq!(toggles.to_string(), "env");
    }

    #[test]
    fn nitrogen_without_bgc_rejected() {
        let flags = ToggleFlags {
            nfeed: true,
            baseline: true,
            ..ToggleFlags::default()
        };
        let err = SubsystemToggles::from_flags(flags).expect_err("must fail");
        let msg = err.to_string();
        assert!(msg.contains("nfeed requires bgc"));
        assert!(msg.contains("baseline requires bgc"));
    }

    #[test]
    fn all_off_rejected() {
        let flags = ToggleFlags {
            env: false,
            ..ToggleFlags::default()
        };
        assert!(matches!(
            SubsystemToggles::from_flags(flags),
            Err(TundraError::Configuration(_))
        ));
    }

    #[test]
    fn flags_roundtrip_through_validation() {
        let flags = ToggleFlags {
            env: true,
            bgc: true,
            nfeed: true,
            avlnflg: false,
            baseline: true,
            dsb: true,
            dsl: true,
            dyn_lai: true,
        };
        let toggles = SubsystemToggles::from_flags(flags).expect("valid");
        assert!(toggles.nfeed());
        assert!(!toggles.avlnflg());
        assert_eq!(toggles.flags(), flags);
        assert_eq!(toggles.to_string(), "env,bgc,nfeed,baseline,dsb,dsl,dyn_lai");
    }
}
