//! CSV loading of municipal series.
//!
//! One row per municipality-year. Header names are matched case- and
//! accent-insensitively against a list of aliases per column.

use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use super::series::{MunicipalSeries, Observation};
use crate::regions::{fold_accents, Biome, Uf};

#[derive(Debug, Error)]
pub enum SeriesLoadError {
    #[error("cannot open series file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("required column '{0}' not found in header")]
    MissingColumn(&'static str),
}

impl SeriesLoadError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Io(_) => "series.io",
            Self::Csv(_) => "series.csv",
            Self::MissingColumn(_) => "series.missing_column",
        }
    }
}

const MUNICIPALITY: &[&str] = &["cd_municipio", "cod_municipio", "codigo_ibge", "id_municipio", "municipio", "municipality"];
const STATE: &[&str] = &["estado", "uf", "sigla_uf", "state"];
const BIOME: &[&str] = &["bioma", "biome"];
const YEAR: &[&str] = &["ano", "year", "ds"];
const AREA: &[&str] = &["conversao_ha", "desmatamento_ha", "area_desmatada_ha", "area_desmatada", "y", "deforested_area"];
const FOREST: &[&str] = &["area_floresta_ha", "floresta_ha", "forest_area"];
const FARM: &[&str] = &["area_fazenda_ha", "area_agropecuaria_ha", "farm_area"];

struct Columns {
    municipality: usize,
    state: usize,
    year: usize,
    area: usize,
    biome: Option<usize>,
    forest: Option<usize>,
    farm: Option<usize>,
}

impl Columns {
    fn locate(headers: &StringRecord) -> Result<Self, SeriesLoadError> {
        let folded: Vec<String> = headers.iter().map(fold_accents).collect();
        let find = |aliases: &[&str]| {
            aliases
                .iter()
                .find_map(|alias| folded.iter().position(|h| h == alias))
        };
        Ok(Self {
            municipality: find(MUNICIPALITY).ok_or(SeriesLoadError::MissingColumn("cd_municipio"))?,
            state: find(STATE).ok_or(SeriesLoadError::MissingColumn("estado"))?,
            year: find(YEAR).ok_or(SeriesLoadError::MissingColumn("ano"))?,
            area: find(AREA).ok_or(SeriesLoadError::MissingColumn("conversao_ha"))?,
            biome: find(BIOME),
            forest: find(FOREST),
            farm: find(FARM),
        })
    }
}

/// Loaded series plus row accounting.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub series: Vec<MunicipalSeries>,
    /// Rows rejected with a warning
    pub dropped_rows: usize,
    /// Rows folded into an earlier row for the same municipality-year
    pub merged_rows: usize,
}

impl LoadReport {
    /// Series grouped by state, municipalities in identifier order.
    pub fn by_state(&self) -> BTreeMap<Uf, Vec<MunicipalSeries>> {
        let mut grouped: BTreeMap<Uf, Vec<MunicipalSeries>> = BTreeMap::new();
        for series in &self.series {
            grouped.entry(series.state()).or_default().push(series.clone());
        }
        grouped
    }
}

#[derive(Default)]
struct Accumulator {
    state: Option<Uf>,
    biome: Option<Biome>,
    by_year: BTreeMap<i32, f64>,
    // Land use of the latest year that carried it.
    land_use: Option<(i32, Option<f64>, Option<f64>)>,
}

pub fn load_series_csv(path: &Path) -> Result<LoadReport, SeriesLoadError> {
    let file = File::open(path)?;
    let report = read_series(file)?;
    info!(
        path = %path.display(),
        municipalities = report.series.len(),
        dropped_rows = report.dropped_rows,
        "Loaded municipal series"
    );
    Ok(report)
}

/// Read series from any CSV source.
///
/// Rows with unparsable or negative values are dropped with a warning.
/// Repeated municipality-years are summed.
pub fn read_series<R: Read>(source: R) -> Result<LoadReport, SeriesLoadError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(source);

    let columns = Columns::locate(reader.headers()?)?;
    let mut report = LoadReport::default();
    let mut municipalities: BTreeMap<String, Accumulator> = BTreeMap::new();

    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        // Header is line 1.
        let line = idx + 2;
        if record.iter().all(str::is_empty) {
            continue;
        }

        let field = |i: usize| record.get(i).unwrap_or_default();
        let municipality = field(columns.municipality);
        if municipality.is_empty() {
            warn!(line, "Dropping row without municipality");
            report.dropped_rows += 1;
            continue;
        }

        let state = match field(columns.state).parse::<Uf>() {
            Ok(state) => state,
            Err(e) => {
                warn!(line, error = %e, "Dropping row");
                report.dropped_rows += 1;
                continue;
            }
        };
        let Some(year) = parse_year(field(columns.year)) else {
            warn!(line, value = field(columns.year), "Dropping row with invalid year");
            report.dropped_rows += 1;
            continue;
        };
        let area = match parse_decimal(field(columns.area)) {
            Some(area) if area >= 0.0 => area,
            _ => {
                warn!(line, value = field(columns.area), "Dropping row with invalid area");
                report.dropped_rows += 1;
                continue;
            }
        };
        let biome = match columns.biome.map(field).filter(|b| !b.is_empty()) {
            None => None,
            Some(raw) => match raw.parse::<Biome>() {
                Ok(biome) => Some(biome),
                Err(e) => {
                    warn!(line, error = %e, "Dropping row");
                    report.dropped_rows += 1;
                    continue;
                }
            },
        };

        let acc = municipalities.entry(municipality.to_string()).or_default();
        match acc.state {
            Some(known) if known != state => {
                warn!(line, municipality, %known, %state, "Dropping row with conflicting state");
                report.dropped_rows += 1;
                continue;
            }
            _ => acc.state = Some(state),
        }
        if acc.biome.is_none() {
            acc.biome = biome;
        }

        let forest = columns.forest.map(field).and_then(parse_decimal);
        let farm = columns.farm.map(field).and_then(parse_decimal);
        if (forest.is_some() || farm.is_some())
            && acc.land_use.map_or(true, |(seen, _, _)| year >= seen)
        {
            acc.land_use = Some((year, forest, farm));
        }

        match acc.by_year.get_mut(&year) {
            Some(total) => {
                *total += area;
                report.merged_rows += 1;
            }
            None => {
                acc.by_year.insert(year, area);
            }
        }
    }

    for (municipality, acc) in municipalities {
        let Some(state) = acc.state else { continue };
        let last_year = acc.by_year.keys().next_back().copied();
        let observations: Vec<Observation> = acc
            .by_year
            .into_iter()
            .map(|(year, area)| Observation { year, area })
            .collect();
        match MunicipalSeries::new(municipality, state, observations) {
            Ok(series) => {
                let series = series.with_biome(acc.biome);
                // Land use only describes the last observed year.
                let series = match acc.land_use {
                    Some((year, forest, farm)) if Some(year) == last_year => {
                        series.with_land_use(forest, farm)
                    }
                    _ => series,
                };
                report.series.push(series);
            }
            Err(e) => warn!(error = %e, "Dropping municipality"),
        }
    }

    Ok(report)
}

fn parse_year(raw: &str) -> Option<i32> {
    // Accept "2019" as well as date stamps such as "2019-01-01".
    let head = raw.get(..4)?;
    let year: i32 = head.parse().ok()?;
    let rest = &raw[4..];
    (rest.is_empty() || rest.starts_with('-') || rest.starts_with('/')).then_some(year)
}

/// Decimal in either "1234.5" or Brazilian "1.234,5" notation.
fn parse_decimal(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let normalized = if raw.contains(',') {
        raw.replace('.', "").replace(',', ".")
    } else {
        raw.to_string()
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const CSV: &str = "\
cd_municipio,Estado,bioma,ano,conversao_ha,area_floresta_ha,area_fazenda_ha
1500107,PA,Amazônia,2019,100.5,,
1500107,PA,Amazônia,2020,120,,
1500107,Pará,Amazônia,2021,90,5000,2000
1500107,PA,Amazônia,2021,10,,
5100102,MT,Cerrado,2020,-4,,
5100102,MT,Cerrado,2021,\"1.234,5\",,
5100102,XX,Cerrado,2022,3,,
";

    #[test]
    fn test_read_series() {
        let report = read_series(CSV.as_bytes()).unwrap();
        assert_eq!(report.series.len(), 2);
        assert_eq!(report.dropped_rows, 2);
        assert_eq!(report.merged_rows, 1);

        let para = &report.series[0];
        assert_eq!(para.state(), Uf::Para);
        assert_eq!(para.biome(), Some(Biome::Amazonia));
        assert_eq!(para.len(), 3);
        assert_eq!(para.area_in(2021), Some(100.0));
        assert_eq!(para.forest_area(), Some(5000.0));
        assert_eq!(para.farm_area(), Some(2000.0));

        let mt = &report.series[1];
        assert_eq!(mt.observations().len(), 1);
        assert_eq!(mt.area_in(2021), Some(1234.5));

        let grouped = report.by_state();
        assert_eq!(grouped.keys().copied().collect::<Vec<_>>(), vec![Uf::MatoGrosso, Uf::Para]);
    }

    #[test]
    fn test_header_aliases_and_missing_column() {
        let csv = "Municipio,UF,Ano,Desmatamento_ha\nabc,AM,2020-01-01,4\n";
        let report = read_series(csv.as_bytes()).unwrap();
        assert_eq!(report.series[0].area_in(2020), Some(4.0));

        let err = read_series("municipio,uf,ano\nabc,AM,2020\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SeriesLoadError::MissingColumn("conversao_ha")));
        assert_eq!(err.kind(), "series.missing_column");
    }

    #[test]
    fn test_unknown_biome_dropped() {
        let csv = "cd_municipio,estado,bioma,ano,conversao_ha\n1,AC,Tundra,2020,1\n1,AC,,2021,2\n";
        let report = read_series(csv.as_bytes()).unwrap();
        assert_eq!(report.dropped_rows, 1);
        assert_eq!(report.series[0].len(), 1);
        assert_eq!(report.series[0].biome(), None);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{CSV}").unwrap();
        let report = load_series_csv(file.path()).unwrap();
        assert_eq!(report.series.len(), 2);

        assert!(matches!(
            load_series_csv(Path::new("/nonexistent/series.csv")),
            Err(SeriesLoadError::Io(_))
        ));
    }

    #[test]
    fn test_parse_helpers() {
        assert_eq!(parse_year("2019"), Some(2019));
        assert_eq!(parse_year("2019-12-31"), Some(2019));
        assert_eq!(parse_year("19"), None);
        assert_eq!(parse_decimal("1.234,56"), Some(1234.56));
        assert_eq!(parse_decimal("12.5"), Some(12.5));
        assert_eq!(parse_decimal("n/d"), None);
    }
}
