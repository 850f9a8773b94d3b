//! Dumps the OpenAPI document of the HTTP API.
//!
//! With no arguments the JSON goes to stdout; `--output <file>` writes it to
//! a file instead.

use std::{env, fs, io::Write, path::PathBuf};

use anyhow::{bail, Context};
use home_climate_service::api::handlers::ApiDoc;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let mut output = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--output" | "-o" => {
                let path = args.next().context("--output needs a file name")?;
                output = Some(PathBuf::from(path));
            }
            other => bail!("unexpected argument {other:?}"),
        }
    }

    let document = ApiDoc::openapi().to_pretty_json()?;
    match output {
        Some(path) => {
            fs::write(&path, &document).with_context(|| format!("writing {}", path.display()))?;
            eprintln!("wrote {}", path.display());
        }
        None => std::io::stdout().lock().write_all(document.as_bytes())?,
    }
    Ok(())
}
