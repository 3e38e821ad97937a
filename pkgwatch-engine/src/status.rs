//! Upgrade classification.

use crate::types::PackageState;

/// The three-way answer every init/complete reply carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeStatus {
    NoUpgrades,
    UpgradesPresent,
    SecurityUpgradesPresent,
}

/// Classify the available upgrades.
///
/// A package counts only when it has an installed version and the
/// engine marks it upgradable. Any such package whose candidate is
/// available from `security_origin` short-circuits the scan: security
/// upgrades outrank everything else.
pub fn classify_upgrades<'a, I>(packages: I, security_origin: &str) -> UpgradeStatus
where
    I: IntoIterator<Item = &'a PackageState>,
{
    let mut upgrades_exist = false;

    for pkg in packages {
        if pkg.installed.is_none() || !pkg.upgradable {
            continue;
        }
        upgrades_exist = true;
        if pkg.origins.iter().any(|site| site == security_origin) {
            return UpgradeStatus::SecurityUpgradesPresent;
        }
    }

    if upgrades_exist {
        UpgradeStatus::UpgradesPresent
    } else {
        UpgradeStatus::NoUpgrades
    }
}
