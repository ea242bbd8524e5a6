//! Live and rotation path generation
//!
//! A destination `(dir, name, group)` never maps to a fixed file: the live
//! path is derived from a template at open time and the rotation path at
//! rotation time. Both generators are pure; callers create parent
//! directories themselves.
//!
//! Templates substitute `{dir}`, `{name}`, `{group}` and chrono strftime
//! fields of the handle's opening timestamp. The strftime pass runs first so
//! client-supplied destination strings can never inject format specifiers.

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

/// Path generator for one view (files or links) of a destination
///
/// The `Void` shape generates nothing and stands in when symlinks are
/// disabled; callers treat `None` as "no link / no-op".
pub enum PathGen {
    Templates {
        root: PathBuf,
        live: String,
        rotation: String,
    },
    Void,
}

impl PathGen {
    /// Generator backed by templates under a root directory
    pub fn templates(
        root: impl Into<PathBuf>,
        live: impl Into<String>,
        rotation: impl Into<String>,
    ) -> Self {
        Self::Templates {
            root: root.into(),
            live: live.into(),
            rotation: rotation.into(),
        }
    }

    /// Generator that produces no paths
    pub fn void() -> Self {
        Self::Void
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Path currently being appended to for the destination
    pub fn live(
        &self,
        dir: &str,
        name: &str,
        group: &str,
        t: &DateTime<Local>,
    ) -> Option<PathBuf> {
        match self {
            Self::Templates { root, live, .. } => Some(render(root, live, dir, name, group, t)),
            Self::Void => None,
        }
    }

    /// Archival path the live file is renamed into at rotation time
    pub fn rotation(
        &self,
        dir: &str,
        name: &str,
        group: &str,
        t: &DateTime<Local>,
    ) -> Option<PathBuf> {
        match self {
            Self::Templates { root, rotation, .. } => {
                Some(render(root, rotation, dir, name, group, t))
            }
            Self::Void => None,
        }
    }
}

fn render(
    root: &Path,
    template: &str,
    dir: &str,
    name: &str,
    group: &str,
    t: &DateTime<Local>,
) -> PathBuf {
    let stamped = t.format(template).to_string();
    let filled = stamped
        .replace("{dir}", dir)
        .replace("{name}", name)
        .replace("{group}", group);
    root.join(filled)
}

/// Checks a template against chrono's strftime syntax
///
/// Run once at startup; rendering assumes the template is clean and would
/// otherwise panic inside chrono's `Display`.
pub fn validate_template(template: &str) -> std::result::Result<(), String> {
    for item in StrftimeItems::new(template) {
        if matches!(item, Item::Error) {
            return Err(format!("bad strftime specifier in `{}`", template));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 5, 7, 9, 11).unwrap()
    }

    #[test]
    fn test_live_substitutes_destination_fields() {
        let gen = PathGen::templates("/logs", "{dir}/{name}", "{dir}/{name}-%Y%m%d");
        let p = gen.live("web", "access.log", "frontend", &t()).unwrap();
        assert_eq!(p, PathBuf::from("/logs/web/access.log"));
    }

    #[test]
    fn test_rotation_substitutes_time_fields() {
        let gen = PathGen::templates("/logs", "{dir}/{name}", "{dir}/{name}-%Y%m%d_%H%M%S");
        let p = gen.rotation("web", "access.log", "frontend", &t()).unwrap();
        assert_eq!(p, PathBuf::from("/logs/web/access.log-20240305_070911"));
    }

    #[test]
    fn test_live_and_rotation_differ() {
        let gen = PathGen::templates("/logs", "{dir}/{name}", "{dir}/{name}-%Y%m%d");
        let live = gen.live("a", "b", "c", &t()).unwrap();
        let rot = gen.rotation("a", "b", "c", &t()).unwrap();
        assert_ne!(live, rot);
    }

    #[test]
    fn test_void_generates_nothing() {
        let gen = PathGen::void();
        assert!(gen.live("a", "b", "c", &t()).is_none());
        assert!(gen.rotation("a", "b", "c", &t()).is_none());
    }

    #[test]
    fn test_destination_fields_cannot_inject_strftime() {
        // The strftime pass runs before substitution, so a `%` inside a
        // client-supplied name stays literal.
        let gen = PathGen::templates("/logs", "{dir}/{name}", "{dir}/{name}-%Y");
        let p = gen.live("web", "odd%Yname", "g", &t()).unwrap();
        assert_eq!(p, PathBuf::from("/logs/web/odd%Yname"));
    }

    #[test]
    fn test_validate_template_accepts_plain_and_strftime() {
        assert!(validate_template("{dir}/{name}").is_ok());
        assert!(validate_template("{dir}/{name}-%Y%m%d_%H%M%S").is_ok());
    }

    #[test]
    fn test_validate_template_rejects_bad_specifier() {
        assert!(validate_template("{name}-%Q%").is_err());
    }
}
