use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::info;

/// Substitute `^^name` and `^^{name}` placeholders. Longer names are
/// replaced first so `^^docker` never clobbers `^^docker_compose`.
pub fn render_template(template: &str, values: &BTreeMap<String, String>) -> String {
    let mut names: Vec<&String> = values.keys().collect();
    names.sort_by_key(|name| std::cmp::Reverse(name.len()));

    let mut out = template.to_string();
    for name in names {
        let value = &values[name];
        out = out.replace(&format!("^^{{{name}}}"), value);
        out = out.replace(&format!("^^{name}"), value);
    }
    out
}

/// Render the install script from a template file and write it into the
/// dist directory with the executable bit set.
pub async fn write_install_script(
    dist: &Path,
    template_path: &Path,
    values: &BTreeMap<String, String>,
) -> Result<PathBuf> {
    let template = fs::read_to_string(template_path)
        .await
        .with_context(|| format!("failed to read template '{}'", template_path.display()))?;

    let script_path = dist.join("install.sh");
    fs::write(&script_path, render_template(&template, values))
        .await
        .with_context(|| format!("failed to write '{}'", script_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755))
            .await
            .context("failed to mark install script executable")?;
    }

    info!(script = %script_path.display(), "install script generated");
    Ok(script_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn both_placeholder_forms_are_substituted() {
        let values = values(&[("dce", "dce-1.4.0.tar.gz")]);
        let out = render_template("tar xf ^^dce && install ^^{dce}", &values);
        assert_eq!(out, "tar xf dce-1.4.0.tar.gz && install dce-1.4.0.tar.gz");
    }

    #[test]
    fn longer_names_are_not_shadowed_by_prefixes() {
        let values = values(&[("docker", "docker.tgz"), ("docker_compose", "compose.bin")]);
        let out = render_template("cp ^^docker_compose /usr/bin; tar xf ^^docker", &values);
        assert_eq!(out, "cp compose.bin /usr/bin; tar xf docker.tgz");
    }

    #[tokio::test]
    async fn script_lands_in_dist_and_is_executable() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("installer_template.sh");
        std::fs::write(&template, "#!/bin/sh\ntar xf ^^pkg\n").unwrap();

        let values = values(&[("pkg", "pkg-2.0.0.tar.gz")]);
        let script = write_install_script(dir.path(), &template, &values)
            .await
            .unwrap();

        let body = std::fs::read_to_string(&script).unwrap();
        assert_eq!(body, "#!/bin/sh\ntar xf pkg-2.0.0.tar.gz\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&script).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }
}
