// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::Path;

/// Directories a root filesystem cannot function without.
pub const ESSENTIAL_DIRS: &[&str] = &["bin", "lib", "dev", "proc", "sys"];

/// Directories whose absence is survivable but suspicious.
pub const RECOMMENDED_DIRS: &[&str] = &["etc", "tmp", "var", "usr", "sbin", "run"];

/// At least one of these must exist or there is nothing to exec after the
/// pivot.
pub const ESSENTIAL_EXECUTABLES: &[&str] = &["bin/sh", "bin/bash", "sbin/init", "usr/bin/sh"];

#[derive(Debug, Clone)]
pub struct VerifyReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Checks that `path` is usable as a new root: the essential directory
/// skeleton is present and at least one shell or init exists.
pub fn verify(path: &Path) -> VerifyReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for dir in ESSENTIAL_DIRS {
        if !path.join(dir).is_dir() {
            errors.push(format!("missing essential directory: /{}", dir));
        }
    }
    for dir in RECOMMENDED_DIRS {
        if !path.join(dir).is_dir() {
            warnings.push(format!("missing recommended directory: /{}", dir));
        }
    }
    if !ESSENTIAL_EXECUTABLES.iter().any(|exe| path.join(exe).exists()) {
        errors.push(format!(
            "no usable shell or init found (looked for {})",
            ESSENTIAL_EXECUTABLES.join(", ")
        ));
    }

    VerifyReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Quick form of [`verify`]: true iff all essential directories exist and at
/// least one essential executable exists.
pub fn is_valid(path: &Path) -> bool {
    ESSENTIAL_DIRS.iter().all(|dir| path.join(dir).is_dir())
        && ESSENTIAL_EXECUTABLES.iter().any(|exe| path.join(exe).exists())
}

#[cfg(test)]
mod tests {
    use super::*;

    use anyhow::Result;

    fn populate(root: &Path, dirs: &[&str], files: &[&str]) -> Result<()> {
        for dir in dirs {
            std::fs::create_dir_all(root.join(dir))?;
        }
        for file in files {
            std::fs::write(root.join(file), "#!/bin/true\n")?;
        }
        Ok(())
    }

    #[test]
    fn accepts_a_minimal_rootfs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        populate(dir.path(), ESSENTIAL_DIRS, &["bin/sh"])?;

        let report = verify(dir.path());
        assert!(report.valid, "errors: {:?}", report.errors);
        assert!(report.errors.is_empty());
        // All recommended directories are absent.
        assert_eq!(report.warnings.len(), RECOMMENDED_DIRS.len());
        assert!(is_valid(dir.path()));
        Ok(())
    }

    #[test]
    fn missing_essential_dir_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        populate(dir.path(), &["bin", "lib", "dev", "proc"], &["bin/sh"])?;

        let report = verify(dir.path());
        assert!(!report.valid);
        assert_eq!(report.errors, vec!["missing essential directory: /sys".to_string()]);
        assert!(!is_valid(dir.path()));
        Ok(())
    }

    #[test]
    fn missing_shell_is_an_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        populate(dir.path(), ESSENTIAL_DIRS, &[])?;

        let report = verify(dir.path());
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(!is_valid(dir.path()));
        Ok(())
    }

    #[test]
    fn any_listed_executable_satisfies_the_check() -> Result<()> {
        for exe in ESSENTIAL_EXECUTABLES {
            let dir = tempfile::tempdir()?;
            let mut dirs: Vec<&str> = ESSENTIAL_DIRS.to_vec();
            dirs.push(Path::new(exe).parent().unwrap().to_str().unwrap());
            populate(dir.path(), &dirs, &[exe])?;
            assert!(verify(dir.path()).valid, "with only {}", exe);
        }
        Ok(())
    }

    #[test]
    fn report_validity_implies_quick_check() -> Result<()> {
        // Soundness between the two entry points on a grab bag of trees.
        for (dirs, files) in [
            (ESSENTIAL_DIRS.to_vec(), vec!["bin/sh"]),
            (vec!["bin", "lib"], vec!["bin/sh"]),
            (ESSENTIAL_DIRS.to_vec(), vec![]),
        ] {
            let dir = tempfile::tempdir()?;
            populate(dir.path(), &dirs, &files)?;
            if verify(dir.path()).valid {
                assert!(is_valid(dir.path()));
            }
        }
        Ok(())
    }
}
