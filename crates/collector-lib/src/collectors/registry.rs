//! Every collector the runner can build and how it is selected

use super::{
    new_dpll_collector, CollectionConstructor, Collector, DevInfoCollector, GnssCollector,
    LogsCollector, PmcCollector, DEVINFO_COLLECTOR_NAME, DPLL_COLLECTOR_NAME, GNSS_COLLECTOR_NAME,
    LOGS_COLLECTOR_NAME, PMC_COLLECTOR_NAME,
};
use crate::error::Result;
use std::fmt;
use tracing::warn;

/// Selects every registered collector
pub const ALL_SELECTOR: &str = "all";
/// Selects the collectors that run when nothing is asked for
pub const DEFAULTS_SELECTOR: &str = "defaults";

/// When a collector runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    /// Always runs, whatever was selected
    Required,
    /// Runs unless a narrower selection was given
    Default,
    /// Runs only when named or selected with `all`
    OptIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectorKind {
    DevInfo,
    Dpll,
    Gnss,
    Pmc,
    Logs,
}

impl CollectorKind {
    /// Registration order, which is also start order
    pub const ALL: [CollectorKind; 5] = [
        CollectorKind::DevInfo,
        CollectorKind::Dpll,
        CollectorKind::Gnss,
        CollectorKind::Pmc,
        CollectorKind::Logs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CollectorKind::DevInfo => DEVINFO_COLLECTOR_NAME,
            CollectorKind::Dpll => DPLL_COLLECTOR_NAME,
            CollectorKind::Gnss => GNSS_COLLECTOR_NAME,
            CollectorKind::Pmc => PMC_COLLECTOR_NAME,
            CollectorKind::Logs => LOGS_COLLECTOR_NAME,
        }
    }

    pub fn inclusion(self) -> Inclusion {
        match self {
            CollectorKind::DevInfo => Inclusion::Required,
            CollectorKind::Logs => Inclusion::OptIn,
            _ => Inclusion::Default,
        }
    }

    /// Case-insensitive lookup by registry name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
    }

    pub async fn build(self, constructor: &mut CollectionConstructor) -> Result<Box<dyn Collector>> {
        Ok(match self {
            CollectorKind::DevInfo => Box::new(DevInfoCollector::new(constructor).await?),
            CollectorKind::Dpll => new_dpll_collector(constructor).await?,
            CollectorKind::Gnss => Box::new(GnssCollector::new(constructor).await?),
            CollectorKind::Pmc => Box::new(PmcCollector::new(constructor).await?),
            CollectorKind::Logs => Box::new(LogsCollector::new(constructor).await?),
        })
    }
}

impl fmt::Display for CollectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Names accepted by `--collector`, for help text
pub fn selector_names() -> Vec<&'static str> {
    let mut names = vec![ALL_SELECTOR, DEFAULTS_SELECTOR];
    names.extend(CollectorKind::ALL.iter().map(|kind| kind.name()));
    names
}

/// Resolve `--collector` values into the collectors to run, in registration order.
///
/// No selection means `defaults`. Unknown names are warned about and skipped,
/// and required collectors are always included.
pub fn collectors_to_run<S: AsRef<str>>(selected: &[S]) -> Vec<CollectorKind> {
    let mut wanted: Vec<CollectorKind> = CollectorKind::ALL
        .into_iter()
        .filter(|kind| kind.inclusion() == Inclusion::Required)
        .collect();
    let mut select = |kinds: &mut dyn Iterator<Item = CollectorKind>| {
        for kind in kinds {
            if !wanted.contains(&kind) {
                wanted.push(kind);
            }
        }
    };

    let defaults = || {
        CollectorKind::ALL
            .into_iter()
            .filter(|kind| kind.inclusion() != Inclusion::OptIn)
    };
    if selected.is_empty() {
        select(&mut defaults());
    }
    for name in selected {
        let name = name.as_ref();
        if name.eq_ignore_ascii_case(ALL_SELECTOR) {
            select(&mut CollectorKind::ALL.into_iter());
        } else if name.eq_ignore_ascii_case(DEFAULTS_SELECTOR) {
            select(&mut defaults());
        } else if let Some(kind) = CollectorKind::from_name(name) {
            select(&mut std::iter::once(kind));
        } else {
            warn!(collector = name, "Unknown collector, ignoring");
        }
    }

    wanted.sort_by_key(|kind| CollectorKind::ALL.iter().position(|k| k == kind));
    wanted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_exclude_logs() {
        let kinds = collectors_to_run::<&str>(&[]);
        assert_eq!(
            kinds,
            vec![
                CollectorKind::DevInfo,
                CollectorKind::Dpll,
                CollectorKind::Gnss,
                CollectorKind::Pmc
            ]
        );
        assert_eq!(collectors_to_run(&["Defaults"]), kinds);
    }

    #[test]
    fn test_all_includes_opt_in() {
        assert_eq!(collectors_to_run(&["ALL"]), CollectorKind::ALL.to_vec());
    }

    #[test]
    fn test_named_selection_keeps_required() {
        let kinds = collectors_to_run(&["gnss", "bogus", "logs", "GNSS"]);
        assert_eq!(
            kinds,
            vec![CollectorKind::DevInfo, CollectorKind::Gnss, CollectorKind::Logs]
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(CollectorKind::from_name("dpll"), Some(CollectorKind::Dpll));
        assert_eq!(CollectorKind::from_name(" DevInfo "), Some(CollectorKind::DevInfo));
        assert_eq!(CollectorKind::from_name("nope"), None);
        assert!(selector_names().contains(&"PMC"));
    }
}
