// src/actions/stations.rs

//! Station-referential steps: download the shapefile archive, extract it,
//! load it into the raw table via the external loader, and rebuild the
//! normalized `stations` table.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use chrono::Local;
use tokio::process::Command;
use tracing::{debug, info};

use crate::actions::{fetch_bytes, file_target, marker_target, upstream_file_path, ActionContext};
use crate::target::Target;
use crate::task::{TaskId, TaskKind, TaskParams, TaskSpec};

/// Download the stations shapefile archive for the city.
pub async fn fetch_stations(ctx: &ActionContext, spec: &TaskSpec) -> Result<()> {
    let city = ctx.city_config(&spec.id.params.city)?;
    info!(task = %spec.id, url = %city.stations_url, "downloading stations archive");

    let body = fetch_bytes(ctx, &city.stations_url).await?;
    file_target(spec)?.materialize(&body)?;
    Ok(())
}

/// Extract the downloaded archive next to it and record the extracted
/// entries in the `.done` file.
pub async fn unzip_stations(ctx: &ActionContext, spec: &TaskSpec) -> Result<()> {
    let zip_path = upstream_file_path(ctx, spec, TaskKind::FetchStations)?;
    let dest = zip_path
        .parent()
        .context("stations archive has no parent directory")?
        .to_path_buf();

    info!(task = %spec.id, zip = %zip_path.display(), "extracting stations archive");
    let args: Vec<OsString> = vec![
        OsString::from("-o"),
        zip_path.clone().into_os_string(),
        OsString::from("-d"),
        dest.into_os_string(),
    ];
    let output = run_subprocess("unzip", &args).await?;

    let mut done = format!(
        "unzip {} stations at {}\n",
        spec.id.params.city,
        Local::now().naive_local()
    );
    done.push_str(&output);
    file_target(spec)?.materialize(done.as_bytes())?;
    Ok(())
}

/// Invoke the external shapefile-to-table loader:
/// `<loader> <srid> <shapefile> <table> <db path>`.
pub async fn load_stations_shapefile(ctx: &ActionContext, spec: &TaskSpec) -> Result<()> {
    let city = ctx.city_config(&spec.id.params.city)?;
    let shapefile = stations_archive_path(ctx, spec)?
        .parent()
        .context("archive path has no parent directory")?
        .join(format!("{}.shp", city.typename));
    let table = format!("{}_raw_stations", city.schema);

    info!(
        task = %spec.id,
        loader = %ctx.config.pipeline.shapefile_loader,
        shapefile = %shapefile.display(),
        table = %table,
        "loading shapefile into raw table"
    );

    let args: Vec<OsString> = vec![
        OsString::from(&city.srid),
        shapefile.clone().into_os_string(),
        OsString::from(&table),
        ctx.config.database.path.clone().into_os_string(),
    ];
    let output = run_subprocess(&ctx.config.pipeline.shapefile_loader, &args).await?;

    let mut done = format!(
        "loaded {} into {} at {}\n",
        shapefile.display(),
        table,
        Local::now().naive_local()
    );
    done.push_str(&output);
    file_target(spec)?.materialize(done.as_bytes())?;
    Ok(())
}

/// The loader depends on `unzip-stations`, but the shapefile lives next
/// to the original archive; recompute the archive path from its identity.
fn stations_archive_path(ctx: &ActionContext, spec: &TaskSpec) -> Result<PathBuf> {
    let fetch_id = TaskId::new(
        TaskKind::FetchStations,
        TaskParams::for_city(spec.id.params.city.clone()),
    );
    let fetch_spec = TaskSpec::build(fetch_id.kind, &fetch_id.params, &ctx.config)?;
    match fetch_spec.target {
        Target::File(f) => Ok(f.path().to_path_buf()),
        Target::Marker(_) => bail!("stations archive target is not file-backed"),
    }
}

/// Rebuild `<schema>_stations` from `<schema>_raw_stations` using the
/// configured feature-column mapping. Data and marker commit together.
pub async fn normalize_stations(ctx: &ActionContext, spec: &TaskSpec) -> Result<()> {
    let city = ctx.city_config(&spec.id.params.city)?;
    let marker = marker_target(spec)?.clone();
    let schema = city.schema.clone();

    let column = |name: &str| -> Result<&String> {
        city.features
            .get(name)
            .with_context(|| format!("missing feature mapping '{name}'"))
    };

    let sql = format!(
        "DROP TABLE IF EXISTS {schema}_stations;
         CREATE TABLE {schema}_stations AS
         SELECT {id} AS id, {name} AS name, {address} AS address,
                {city_col} AS city, {nb} AS nb_stations, geom
         FROM {schema}_raw_stations;",
        id = column("id")?,
        name = column("name")?,
        address = column("address")?,
        city_col = column("city")?,
        nb = column("nb_stations")?,
    );

    info!(task = %spec.id, table = format!("{schema}_stations"), "normalizing stations table");
    let db = ctx.db.clone();
    tokio::task::spawn_blocking(move || {
        db.commit_with_marker(&marker.identity, &marker.schema, |tx| {
            tx.execute_batch(&sql)?;
            Ok(())
        })
    })
    .await
    .context("normalize task cancelled")??;
    Ok(())
}

/// Spawn a subprocess, capture its output, and fail on non-zero exit.
async fn run_subprocess(program: &str, args: &[OsString]) -> Result<String> {
    let output = Command::new(program)
        .args(args.iter().map(OsString::as_os_str))
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("spawning '{program}'"))?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "'{program}' exited with {}: {}",
            output.status,
            stderr.trim()
        );
    }

    debug!(program, "subprocess finished");
    Ok(stdout)
}
