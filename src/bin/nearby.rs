//! Reports aircraft that recently flew close to each other.
//!
//! Uses the geohash tag journaled with every TH record to do a coarse
//! proximity search: for each grid cell with recent traffic, compares all
//! aircraft in that cell and its eight neighbors pairwise.

use std::collections::BTreeSet;
use std::process;

use chrono::{DateTime, FixedOffset};
use clap::Parser;

use fixm_journaler::influx::{InfluxSettings, InfluxWriter, Series};

#[derive(Parser)]
#[command(name = "find-nearby-aircraft")]
#[command(version, about = "Report aircraft pairs closer than a minimum separation", long_about = None)]
struct Cli {
    /// Base URL of InfluxDB
    #[arg(long, default_value = "http://localhost:8086")]
    url: String,

    /// Database holding the journaled flight records
    #[arg(long, default_value = "fixm")]
    database: String,

    /// Username to authenticate with InfluxDB
    #[arg(long, default_value = "root")]
    username: String,

    /// Password to authenticate with InfluxDB
    #[arg(long, default_value = "root")]
    password: String,

    /// Minimum allowed distance between aircraft, in miles
    #[arg(long, default_value_t = 10.0)]
    minimum_distance: f64,

    /// Maximum allowed time difference between comparable records, in seconds
    #[arg(long, default_value_t = 5.0)]
    maximum_time_difference: f64,

    /// How far back to look for nearby aircraft (e.g. 90s, 5m, 1h)
    #[arg(long, default_value = "1m")]
    duration: String,
}

/// One TH position report pulled back out of storage.
struct Report {
    time: DateTime<FixedOffset>,
    latitude: f64,
    longitude: f64,
    aircraft_id: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let client = InfluxWriter::new(InfluxSettings {
        url: cli.url.clone(),
        database: cli.database.clone(),
        username: cli.username.clone(),
        password: cli.password.clone(),
    });

    // All geohash cells with aircraft in the lookback window.
    let response = client
        .query(&format!(
            "SELECT geohash FROM \"TH\" WHERE time > now() - {}",
            cli.duration
        ))
        .await
        .unwrap_or_else(|err| {
            eprintln!("query failed: {}", err);
            process::exit(1);
        });

    let mut cells = BTreeSet::new();
    for series in response.results.iter().flat_map(|r| r.series.iter()) {
        cells.extend(string_column(series, "geohash"));
    }

    for cell in &cells {
        let mut nearby = vec![cell.clone()];
        match geohash::neighbors(cell) {
            Ok(n) => nearby.extend([n.sw, n.s, n.se, n.w, n.e, n.nw, n.n, n.ne]),
            Err(err) => {
                eprintln!("skipping unparseable geohash '{}': {}", cell, err);
                continue;
            }
        }

        let conditions = nearby
            .iter()
            .map(|g| format!("geohash = '{}'", g))
            .collect::<Vec<_>>()
            .join(" OR ");
        let response = client
            .query(&format!(
                "SELECT latitude, longitude, aircraftIdentification FROM \"TH\" \
                 WHERE ({}) AND time > now() - {}",
                conditions, cli.duration
            ))
            .await
            .unwrap_or_else(|err| {
                eprintln!("query failed: {}", err);
                process::exit(1);
            });

        let reports: Vec<Report> = response
            .results
            .iter()
            .flat_map(|r| r.series.iter())
            .flat_map(parse_reports)
            .collect();

        for (i, a) in reports.iter().enumerate() {
            for b in &reports[i + 1..] {
                if a.aircraft_id == b.aircraft_id {
                    continue;
                }
                let seconds_apart = (a.time - b.time).num_seconds().unsigned_abs() as f64;
                let distance = haversine_miles(a, b);
                if distance < cli.minimum_distance && seconds_apart <= cli.maximum_time_difference
                {
                    println!(
                        "Aircraft {} and {} are {:.2} miles apart",
                        a.aircraft_id, b.aircraft_id, distance
                    );
                }
            }
        }
    }
}

/// Values of a named string column, skipping rows where it is null.
fn string_column(series: &Series, name: &str) -> Vec<String> {
    let Some(index) = series.columns.iter().position(|c| c == name) else {
        return Vec::new();
    };
    series
        .values
        .iter()
        .filter_map(|row| row.get(index).and_then(|v| v.as_str()).map(str::to_string))
        .collect()
}

/// Turn a result series into position reports, skipping incomplete rows.
fn parse_reports(series: &Series) -> Vec<Report> {
    let column = |name: &str| series.columns.iter().position(|c| c == name);
    let (Some(time), Some(lat), Some(lon), Some(id)) = (
        column("time"),
        column("latitude"),
        column("longitude"),
        column("aircraftIdentification"),
    ) else {
        return Vec::new();
    };

    series
        .values
        .iter()
        .filter_map(|row| {
            Some(Report {
                time: row
                    .get(time)?
                    .as_str()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())?,
                latitude: row.get(lat)?.as_f64()?,
                longitude: row.get(lon)?.as_f64()?,
                aircraft_id: row.get(id)?.as_str()?.to_string(),
            })
        })
        .collect()
}

/// Great-circle distance between two reports, in miles.
fn haversine_miles(a: &Report, b: &Report) -> f64 {
    const EARTH_RADIUS_MILES: f64 = 3958.8;

    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().asin()
}
