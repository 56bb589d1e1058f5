//! AppService manifests on disk. `.toml` files are parsed as TOML, anything
//! else as JSON.

use std::path::Path;

use anyhow::Context;
use appgrid_state::AppService;

pub fn load(path: &Path) -> anyhow::Result<AppService> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading manifest {}", path.display()))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let app = if is_toml {
        parse_toml(&content)
    } else {
        parse_json(&content)
    }
    .with_context(|| format!("parsing manifest {}", path.display()))?;
    app.spec.validate()?;
    Ok(app)
}

fn parse_toml(content: &str) -> anyhow::Result<AppService> {
    Ok(toml::from_str(content)?)
}

fn parse_json(content: &str) -> anyhow::Result<AppService> {
    Ok(serde_json::from_str(content)?)
}
