//! Tax table model: effective-dated bracket schedules.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::EstimationError;

/// Rate schedule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxTableKind {
    #[serde(alias = "ISV_CILINDRADA")]
    CylinderCapacity,
    #[serde(alias = "ISV_CO2")]
    Co2Emissions,
    #[serde(alias = "IVA_RATES")]
    VatRates,
    #[serde(alias = "IUC_TABLE")]
    CirculationFee,
}

impl TaxTableKind {
    /// Get string representation for database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CylinderCapacity => "CYLINDER_CAPACITY",
            Self::Co2Emissions => "CO2_EMISSIONS",
            Self::VatRates => "VAT_RATES",
            Self::CirculationFee => "CIRCULATION_FEE",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "CYLINDER_CAPACITY" | "ISV_CILINDRADA" => Some(Self::CylinderCapacity),
            "CO2_EMISSIONS" | "ISV_CO2" => Some(Self::Co2Emissions),
            "VAT_RATES" | "IVA_RATES" => Some(Self::VatRates),
            "CIRCULATION_FEE" | "IUC_TABLE" => Some(Self::CirculationFee),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaxTableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One `[min, max] -> rate` range. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bracket {
    pub min: Decimal,
    pub max: Decimal,
    pub rate: Decimal,
}

impl Bracket {
    pub fn new(min: Decimal, max: Decimal, rate: Decimal) -> Self {
        Self { min, max, rate }
    }

    pub fn contains(&self, value: Decimal) -> bool {
        self.min <= value && value <= self.max
    }
}

/// JSON payload stored in `tax_tables.data`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxTableData {
    pub brackets: Vec<Bracket>,
}

/// A range of integral inputs no bracket covers. `to` is exclusive; `None`
/// means the gap is unbounded above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoverageGap {
    pub from: Decimal,
    pub to: Option<Decimal>,
}

impl std::fmt::Display for CoverageGap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to {
            Some(to) => write!(f, "[{}, {})", self.from, to),
            None => write!(f, "[{}, inf)", self.from),
        }
    }
}

/// One effective-dated version of a rate schedule.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TaxTable {
    pub tax_table_id: Uuid,
    pub kind: TaxTableKind,
    pub version: String,
    pub effective_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub data: Json<TaxTableData>,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_utc: DateTime<Utc>,
}

impl TaxTable {
    pub fn brackets(&self) -> &[Bracket] {
        &self.data.brackets
    }

    /// Whether this table may be selected for `as_of`.
    pub fn is_effective_on(&self, as_of: NaiveDate) -> bool {
        self.is_active
            && self.effective_date <= as_of
            && self.end_date.map_or(true, |end| end > as_of)
    }

    /// Uncovered ranges of the integral domain `[0, inf)`.
    pub fn coverage_gaps(&self) -> Vec<CoverageGap> {
        coverage_gaps(self.brackets())
    }
}

/// Reject brackets that are inverted, unsorted or overlapping.
pub fn validate_brackets(brackets: &[Bracket]) -> Result<(), EstimationError> {
    if brackets.is_empty() {
        return Err(EstimationError::InvalidTable(
            "table must contain at least one bracket".to_string(),
        ));
    }

    for (i, bracket) in brackets.iter().enumerate() {
        if bracket.min > bracket.max {
            return Err(EstimationError::InvalidTable(format!(
                "bracket {} has min {} greater than max {}",
                i, bracket.min, bracket.max
            )));
        }
    }

    for (i, pair) in brackets.windows(2).enumerate() {
        let (prev, next) = (&pair[0], &pair[1]);
        if next.min < prev.min {
            return Err(EstimationError::InvalidTable(format!(
                "bracket {} is not sorted ascending by min",
                i + 1
            )));
        }
        if next.min <= prev.max {
            return Err(EstimationError::InvalidTable(format!(
                "bracket {} overlaps bracket {} at {}",
                i + 1,
                i,
                next.min
            )));
        }
    }

    Ok(())
}

/// Gaps are computed over integers, matching the integral request inputs:
/// `[0, 100]` followed by `[101, 200]` leaves nothing uncovered.
/// Expects brackets that passed [`validate_brackets`].
pub fn coverage_gaps(brackets: &[Bracket]) -> Vec<CoverageGap> {
    let mut gaps = Vec::new();
    let mut next_uncovered = Decimal::ZERO;

    for bracket in brackets {
        let first_covered = bracket.min.ceil();
        if first_covered > next_uncovered {
            gaps.push(CoverageGap {
                from: next_uncovered,
                to: Some(first_covered),
            });
        }
        match bracket.max.floor().checked_add(Decimal::ONE) {
            Some(after) if after > next_uncovered => next_uncovered = after,
            Some(_) => {}
            // Top of the `Decimal` range: covered through infinity.
            None => return gaps,
        }
    }

    gaps.push(CoverageGap {
        from: next_uncovered,
        to: None,
    });
    gaps
}

/// Pick the effective table of `kind`: latest `effective_date`, ties broken
/// by the position in `tables` (later insertion wins).
pub fn select_effective<'a, I>(tables: I, kind: TaxTableKind, as_of: NaiveDate) -> Option<&'a TaxTable>
where
    I: IntoIterator<Item = &'a TaxTable>,
{
    let mut selected: Option<&TaxTable> = None;
    for table in tables {
        if table.kind != kind || !table.is_effective_on(as_of) {
            continue;
        }
        match selected {
            Some(current) if current.effective_date > table.effective_date => {}
            _ => selected = Some(table),
        }
    }
    selected
}

/// Input for creating a tax table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTaxTable {
    pub kind: TaxTableKind,
    pub version: String,
    pub effective_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub brackets: Vec<Bracket>,
    pub notes: Option<String>,
}

impl CreateTaxTable {
    pub fn validate(&self) -> Result<(), EstimationError> {
        if let Some(end) = self.end_date {
            if end <= self.effective_date {
                return Err(EstimationError::InvalidTable(format!(
                    "end date {} must be after effective date {}",
                    end, self.effective_date
                )));
            }
        }
        validate_brackets(&self.brackets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn table(kind: TaxTableKind, effective: &str, end: Option<&str>, active: bool) -> TaxTable {
        TaxTable {
            tax_table_id: Uuid::new_v4(),
            kind,
            version: effective.to_string(),
            effective_date: effective.parse().unwrap(),
            end_date: end.map(|e| e.parse().unwrap()),
            data: Json(TaxTableData {
                brackets: vec![Bracket::new(dec!(0), dec!(99999), dec!(1))],
            }),
            is_active: active,
            notes: None,
            created_utc: Utc::now(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_selects_latest_effective_table() {
        let tables = vec![
            table(TaxTableKind::CylinderCapacity, "2023-01-01", None, true),
            table(TaxTableKind::CylinderCapacity, "2024-01-01", None, true),
            table(TaxTableKind::CylinderCapacity, "2025-01-01", None, true),
        ];

        let selected = select_effective(&tables, TaxTableKind::CylinderCapacity, date("2024-06-30"))
            .unwrap();
        assert_eq!(selected.version, "2024-01-01");
    }

    #[test]
    fn test_skips_inactive_and_other_kinds() {
        let tables = vec![
            table(TaxTableKind::CylinderCapacity, "2023-01-01", None, true),
            table(TaxTableKind::CylinderCapacity, "2024-01-01", None, false),
            table(TaxTableKind::Co2Emissions, "2024-02-01", None, true),
        ];

        let selected = select_effective(&tables, TaxTableKind::CylinderCapacity, date("2024-06-30"))
            .unwrap();
        assert_eq!(selected.version, "2023-01-01");
    }

    #[test]
    fn test_end_date_is_exclusive() {
        let tables = vec![table(
            TaxTableKind::Co2Emissions,
            "2024-01-01",
            Some("2024-12-31"),
            true,
        )];

        assert!(select_effective(&tables, TaxTableKind::Co2Emissions, date("2024-12-30")).is_some());
        assert!(select_effective(&tables, TaxTableKind::Co2Emissions, date("2024-12-31")).is_none());
        assert!(select_effective(&tables, TaxTableKind::Co2Emissions, date("2023-12-31")).is_none());
    }

    #[test]
    fn test_tie_broken_by_latest_insertion() {
        let mut first = table(TaxTableKind::CylinderCapacity, "2024-01-01", None, true);
        first.version = "first".to_string();
        let mut second = table(TaxTableKind::CylinderCapacity, "2024-01-01", None, true);
        second.version = "second".to_string();
        let tables = vec![first, second];

        let selected = select_effective(&tables, TaxTableKind::CylinderCapacity, date("2024-03-01"))
            .unwrap();
        assert_eq!(selected.version, "second");
    }

    #[test]
    fn test_validate_rejects_overlap_and_disorder() {
        let overlapping = vec![
            Bracket::new(dec!(0), dec!(1000), dec!(1)),
            Bracket::new(dec!(1000), dec!(2000), dec!(2)),
        ];
        assert!(matches!(
            validate_brackets(&overlapping),
            Err(EstimationError::InvalidTable(_))
        ));

        let unsorted = vec![
            Bracket::new(dec!(1001), dec!(2000), dec!(2)),
            Bracket::new(dec!(0), dec!(1000), dec!(1)),
        ];
        assert!(validate_brackets(&unsorted).is_err());

        let inverted = vec![Bracket::new(dec!(10), dec!(5), dec!(1))];
        assert!(validate_brackets(&inverted).is_err());

        assert!(validate_brackets(&[]).is_err());
    }

    #[test]
    fn test_coverage_gaps() {
        let brackets = vec![
            Bracket::new(dec!(0), dec!(1000), dec!(1)),
            Bracket::new(dec!(1001), dec!(1250), dec!(2)),
            Bracket::new(dec!(1300), dec!(99999), dec!(3)),
        ];
        assert!(validate_brackets(&brackets).is_ok());

        let gaps = coverage_gaps(&brackets);
        assert_eq!(
            gaps,
            vec![
                CoverageGap {
                    from: dec!(1251),
                    to: Some(dec!(1300)),
                },
                CoverageGap {
                    from: dec!(100000),
                    to: None,
                },
            ]
        );
    }

    #[test]
    fn test_coverage_gap_below_first_bracket() {
        let brackets = vec![Bracket::new(dec!(50), dec!(100), dec!(1))];
        let gaps = coverage_gaps(&brackets);
        assert_eq!(gaps[0].to_string(), "[0, 50)");
        assert_eq!(gaps[1].to_string(), "[101, inf)");
    }

    #[test]
    fn test_open_top_bracket_leaves_no_trailing_gap() {
        let open = vec![Bracket::new(dec!(0), Decimal::MAX, dec!(1))];
        assert!(validate_brackets(&open).is_ok());
        assert!(coverage_gaps(&open).is_empty());

        let with_hole = vec![
            Bracket::new(dec!(0), dec!(100), dec!(1)),
            Bracket::new(dec!(200), Decimal::MAX, dec!(2)),
        ];
        assert_eq!(
            coverage_gaps(&with_hole),
            vec![CoverageGap {
                from: dec!(101),
                to: Some(dec!(200)),
            }]
        );
    }

    #[test]
    fn test_kind_parses_legacy_names() {
        assert_eq!(
            TaxTableKind::from_string("ISV_CILINDRADA"),
            Some(TaxTableKind::CylinderCapacity)
        );
        let kind: TaxTableKind = serde_json::from_str("\"ISV_CO2\"").unwrap();
        assert_eq!(kind, TaxTableKind::Co2Emissions);
        assert_eq!(TaxTableKind::CirculationFee.to_string(), "CIRCULATION_FEE");
    }
}
