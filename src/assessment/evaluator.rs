//! Threshold rules turning a measurement set into per-criterion verdicts.
//!
//! Pure and stateless: the evaluator borrows its input and never fails.
//! A missing required input yields `NotEligible` with both margins empty.

use super::types::{format_decimal, round2, Field, MeasurementSet, ResultRow, Verdict};

/// Coronary ostium height below which valve deployment needs attention.
const CORONARY_HEIGHT_MM: f64 = 10.0;
/// Ascending aorta diameter at or above which the aorta needs attention.
const ASC_AORTA_LIMIT_MM: f64 = 40.0;
/// Calcium load above which deployment needs attention.
const CALCIUM_LIMIT_MM3: f64 = 1000.0;
/// SOV must reach this multiple of the annulus to be unconditionally favourable.
const SOV_PRIMARY_RATIO: f64 = 1.2;
/// SOV between this multiple and the primary one is favourable only with safe coronary heights.
const SOV_SECONDARY_RATIO: f64 = 1.12;

/// Criteria in results-table order.
pub const CRITERIA: [Field; 13] = [
    Field::StjDiameter,
    Field::SovRightDiameter,
    Field::SovLeftDiameter,
    Field::SovNonDiameter,
    Field::Icd4mm,
    Field::Icd6mm,
    Field::Icd8mm,
    Field::RcaHeight,
    Field::LcaHeight,
    Field::LvotDiameter,
    Field::AscAortaDiameter,
    Field::AorticValveAnatomyType,
    Field::CalciumScore,
];

pub struct ConditionEvaluator<'a> {
    input: &'a MeasurementSet,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(input: &'a MeasurementSet) -> Self {
        Self { input }
    }

    /// Verdict for one criterion. Fields that are not criteria are `NotEligible`.
    pub fn evaluate(&self, field: Field) -> Verdict {
        let m = self.input;
        match field {
            Field::StjDiameter => self.against_annulus(m.stj_diameter, false),
            Field::LvotDiameter => self.against_annulus(m.lvot_diameter, false),
            Field::Icd4mm => self.against_annulus(m.icd4mm, true),
            Field::Icd6mm => self.against_annulus(m.icd6mm, true),
            Field::Icd8mm => self.against_annulus(m.icd8mm, true),
            Field::SovLeftDiameter => self.evaluate_sov(m.sov_left_diameter),
            Field::SovRightDiameter => self.evaluate_sov(m.sov_right_diameter),
            Field::SovNonDiameter => self.evaluate_sov(m.sov_non_diameter),
            Field::RcaHeight => coronary_height(m.rca_height),
            Field::LcaHeight => coronary_height(m.lca_height),
            Field::AscAortaDiameter => asc_aorta(m.asc_aorta_diameter),
            Field::CalciumScore => calcium(m.calcium_score),
            Field::AorticValveAnatomyType => valve_anatomy(m.aortic_valve_anatomy_type.as_deref()),
            _ => Verdict::not_eligible(),
        }
    }

    pub fn evaluate_all(&self) -> Vec<(Field, Verdict)> {
        CRITERIA.iter().map(|&f| (f, self.evaluate(f))).collect()
    }

    pub fn generate_results_table(&self) -> Vec<ResultRow> {
        self.evaluate_all()
            .into_iter()
            .map(|(criteria, verdict)| ResultRow {
                criteria,
                value: self.input.display_value(criteria),
                status: verdict.status,
                favourable_pct: verdict.favourable_pct,
                attention_pct: verdict.attention_pct,
                threshold: verdict.threshold,
            })
            .collect()
    }

    /// STJ, LVOT and ICD: favourable when at least the annulus diameter.
    ///
    /// ICD labels round the annulus to two decimals; STJ and LVOT print it as given.
    fn against_annulus(&self, value: Option<f64>, rounded_label: bool) -> Verdict {
        let (Some(value), Some(annulus)) = (value, self.input.annulus_diameter) else {
            return Verdict::not_eligible();
        };
        let label = if rounded_label {
            format_threshold_mm(annulus)
        } else {
            format!("{} mm", format_decimal(annulus))
        };
        if value >= annulus {
            Verdict::favourable(Some((value - annulus) / annulus * 100.0), label)
        } else {
            Verdict::attention(Some((annulus - value) / annulus * 100.0), label)
        }
    }

    fn evaluate_sov(&self, sov: Option<f64>) -> Verdict {
        let (Some(sov), Some(annulus)) = (sov, self.input.annulus_diameter) else {
            return Verdict::not_eligible();
        };
        // Sub-millimetre readings count as absent.
        if sov.trunc() == 0.0 {
            return Verdict::not_eligible();
        }

        let primary = annulus * SOV_PRIMARY_RATIO;
        let secondary = annulus * SOV_SECONDARY_RATIO;

        if sov >= primary {
            return Verdict::favourable(
                Some((sov - primary) / primary * 100.0),
                format_threshold_mm(primary),
            );
        }
        if sov >= secondary && self.coronaries_clear_sinus() {
            return Verdict::favourable(
                Some((sov - secondary) / secondary * 100.0),
                format_threshold_mm(secondary),
            );
        }
        Verdict::attention(
            Some((primary - sov) / primary * 100.0),
            format_threshold_mm(primary),
        )
    }

    /// Both ostia at safe height and above the sinus height.
    fn coronaries_clear_sinus(&self) -> bool {
        let m = self.input;
        match (m.sov_height, m.rca_height, m.lca_height) {
            (Some(height), Some(rca), Some(lca)) => {
                height > 0.0
                    && rca >= CORONARY_HEIGHT_MM
                    && lca >= CORONARY_HEIGHT_MM
                    && height <= rca
                    && height <= lca
            }
            _ => false,
        }
    }
}

fn coronary_height(height: Option<f64>) -> Verdict {
    let Some(height) = height else {
        return Verdict::not_eligible();
    };
    let label = "10 mm";
    if height >= CORONARY_HEIGHT_MM {
        Verdict::favourable(Some((height - CORONARY_HEIGHT_MM) * 10.0), label)
    } else {
        Verdict::attention(Some((CORONARY_HEIGHT_MM - height) * 10.0), label)
    }
}

fn asc_aorta(diameter: Option<f64>) -> Verdict {
    let Some(diameter) = diameter else {
        return Verdict::not_eligible();
    };
    let label = "40 mm";
    if diameter < ASC_AORTA_LIMIT_MM {
        Verdict::favourable(None, label)
    } else {
        Verdict::attention(
            Some((diameter - ASC_AORTA_LIMIT_MM) / ASC_AORTA_LIMIT_MM * 100.0),
            label,
        )
    }
}

fn calcium(score: Option<f64>) -> Verdict {
    let Some(score) = score else {
        return Verdict::not_eligible();
    };
    let label = "1000 mm³";
    if score > CALCIUM_LIMIT_MM3 {
        Verdict::attention(Some((score - CALCIUM_LIMIT_MM3) / 10.0), label)
    } else {
        Verdict::favourable(Some((CALCIUM_LIMIT_MM3 - score) / 10.0), label)
    }
}

fn valve_anatomy(anatomy: Option<&str>) -> Verdict {
    let Some(anatomy) = anatomy else {
        return Verdict::not_eligible();
    };
    if anatomy.to_lowercase().contains("bicuspid") {
        Verdict::attention(None, "Tricuspid")
    } else {
        Verdict::favourable(None, "Tricuspid")
    }
}

/// Threshold label for a computed millimetre value, e.g. `"28.0 mm"`.
///
/// Rounding follows Python's `round(x, 2)` rather than half away from zero:
/// an exact `28.125` prints as `"28.12 mm"`.
pub fn format_threshold_mm(value: f64) -> String {
    format!("{} mm", format_decimal(round2(value)))
}

#[cfg(test)]
mod tests {
    use super::super::types::VerdictStatus;
    use super::*;

    const EPS: f64 = 1e-9;

    fn with_annulus(annulus: f64) -> MeasurementSet {
        MeasurementSet {
            annulus_diameter: Some(annulus),
            ..Default::default()
        }
    }

    #[test]
    fn threshold_labels_round_ties_to_even() {
        assert_eq!(format_threshold_mm(28.125), "28.12 mm");
        assert_eq!(format_threshold_mm(28.375), "28.38 mm");
        assert_eq!(format_threshold_mm(30.0), "30.0 mm");
    }

    #[test]
    fn stj_below_annulus_needs_attention() {
        let set = MeasurementSet {
            stj_diameter: Some(24.0),
            ..with_annulus(25.0)
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::StjDiameter);
        assert_eq!(v.status, VerdictStatus::AttentionRequired);
        assert!((v.attention_pct.unwrap() - 4.0).abs() < EPS);
        assert!(v.favourable_pct.is_none());
        assert_eq!(v.threshold.as_deref(), Some("25.0 mm"));
    }

    #[test]
    fn stj_above_annulus_is_favourable() {
        let set = MeasurementSet {
            stj_diameter: Some(26.0),
            ..with_annulus(25.0)
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::StjDiameter);
        assert_eq!(v.status, VerdictStatus::Favourable);
        assert!((v.favourable_pct.unwrap() - 4.0).abs() < EPS);
        assert!(v.attention_pct.is_none());
    }

    #[test]
    fn calcium_over_limit_needs_attention() {
        let set = MeasurementSet {
            calcium_score: Some(9500.0),
            ..Default::default()
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::CalciumScore);
        assert_eq!(v.status, VerdictStatus::AttentionRequired);
        assert!((v.attention_pct.unwrap() - 850.0).abs() < EPS);
        assert_eq!(v.threshold.as_deref(), Some("1000 mm³"));
    }

    #[test]
    fn calcium_at_limit_is_favourable() {
        let set = MeasurementSet {
            calcium_score: Some(1000.0),
            ..Default::default()
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::CalciumScore);
        assert_eq!(v.status, VerdictStatus::Favourable);
        assert_eq!(v.favourable_pct, Some(0.0));
    }

    #[test]
    fn icd_above_annulus_is_favourable() {
        let set = MeasurementSet {
            icd4mm: Some(27.0),
            ..with_annulus(25.0)
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::Icd4mm);
        assert_eq!(v.status, VerdictStatus::Favourable);
        assert!((v.favourable_pct.unwrap() - 8.0).abs() < EPS);
        assert_eq!(v.threshold.as_deref(), Some("25.0 mm"));
    }

    #[test]
    fn sov_secondary_tier_falls_through_when_lca_low() {
        let set = MeasurementSet {
            sov_left_diameter: Some(28.0),
            rca_height: Some(11.0),
            lca_height: Some(8.0),
            sov_height: Some(9.0),
            ..with_annulus(25.0)
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::SovLeftDiameter);
        assert_eq!(v.status, VerdictStatus::AttentionRequired);
        assert!((v.attention_pct.unwrap() - 20.0 / 3.0).abs() < 1e-6);
        assert_eq!(v.threshold.as_deref(), Some("30.0 mm"));
    }

    #[test]
    fn sov_secondary_tier_favourable_with_clear_coronaries() {
        let set = MeasurementSet {
            sov_right_diameter: Some(29.0),
            rca_height: Some(12.0),
            lca_height: Some(11.0),
            sov_height: Some(10.5),
            ..with_annulus(25.0)
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::SovRightDiameter);
        assert_eq!(v.status, VerdictStatus::Favourable);
        let secondary = 25.0 * 1.12;
        assert!((v.favourable_pct.unwrap() - (29.0 - secondary) / secondary * 100.0).abs() < EPS);
        assert_eq!(v.threshold.as_deref(), Some("28.0 mm"));
    }

    #[test]
    fn sov_secondary_tier_requires_height_below_ostia() {
        let set = MeasurementSet {
            sov_right_diameter: Some(29.0),
            rca_height: Some(12.0),
            lca_height: Some(11.0),
            sov_height: Some(11.5),
            ..with_annulus(25.0)
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::SovRightDiameter);
        assert_eq!(v.status, VerdictStatus::AttentionRequired);
    }

    #[test]
    fn sov_primary_tier_is_favourable() {
        let set = MeasurementSet {
            sov_non_diameter: Some(33.0),
            ..with_annulus(25.0)
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::SovNonDiameter);
        assert_eq!(v.status, VerdictStatus::Favourable);
        assert!((v.favourable_pct.unwrap() - 10.0).abs() < 1e-6);
        assert_eq!(v.threshold.as_deref(), Some("30.0 mm"));
    }

    #[test]
    fn sov_zero_is_not_eligible() {
        let set = MeasurementSet {
            sov_left_diameter: Some(0.4),
            ..with_annulus(25.0)
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::SovLeftDiameter);
        assert_eq!(v.status, VerdictStatus::NotEligible);
    }

    #[test]
    fn missing_annulus_makes_dependents_not_eligible() {
        let set = MeasurementSet {
            stj_diameter: Some(24.0),
            lvot_diameter: Some(26.0),
            icd4mm: Some(27.0),
            icd6mm: Some(28.0),
            icd8mm: Some(29.0),
            sov_left_diameter: Some(30.0),
            sov_right_diameter: Some(31.0),
            sov_non_diameter: Some(32.0),
            ..Default::default()
        };
        let evaluator = ConditionEvaluator::new(&set);
        for field in [
            Field::StjDiameter,
            Field::LvotDiameter,
            Field::Icd4mm,
            Field::Icd6mm,
            Field::Icd8mm,
            Field::SovLeftDiameter,
            Field::SovRightDiameter,
            Field::SovNonDiameter,
        ] {
            let v = evaluator.evaluate(field);
            assert_eq!(v.status, VerdictStatus::NotEligible, "{field}");
            assert!(v.favourable_pct.is_none() && v.attention_pct.is_none(), "{field}");
        }
    }

    #[test]
    fn coronary_heights_use_fixed_threshold() {
        let set = MeasurementSet {
            rca_height: Some(11.0),
            lca_height: Some(8.0),
            ..Default::default()
        };
        let evaluator = ConditionEvaluator::new(&set);
        let rca = evaluator.evaluate(Field::RcaHeight);
        assert_eq!(rca.status, VerdictStatus::Favourable);
        assert!((rca.favourable_pct.unwrap() - 10.0).abs() < EPS);
        let lca = evaluator.evaluate(Field::LcaHeight);
        assert_eq!(lca.status, VerdictStatus::AttentionRequired);
        assert!((lca.attention_pct.unwrap() - 20.0).abs() < EPS);
        assert_eq!(lca.threshold.as_deref(), Some("10 mm"));
    }

    #[test]
    fn asc_aorta_favourable_has_no_margin() {
        let small = MeasurementSet {
            asc_aorta_diameter: Some(35.0),
            ..Default::default()
        };
        let v = ConditionEvaluator::new(&small).evaluate(Field::AscAortaDiameter);
        assert_eq!(v.status, VerdictStatus::Favourable);
        assert!(v.favourable_pct.is_none() && v.attention_pct.is_none());

        let large = MeasurementSet {
            asc_aorta_diameter: Some(50.0),
            ..Default::default()
        };
        let v = ConditionEvaluator::new(&large).evaluate(Field::AscAortaDiameter);
        assert_eq!(v.status, VerdictStatus::AttentionRequired);
        assert!((v.attention_pct.unwrap() - 25.0).abs() < EPS);
        assert_eq!(v.threshold.as_deref(), Some("40 mm"));
    }

    #[test]
    fn bicuspid_anatomy_needs_attention() {
        let set = MeasurementSet {
            aortic_valve_anatomy_type: Some("Bicuspid Type 1a".into()),
            ..Default::default()
        };
        let v = ConditionEvaluator::new(&set).evaluate(Field::AorticValveAnatomyType);
        assert_eq!(v.status, VerdictStatus::AttentionRequired);
        assert_eq!(v.threshold.as_deref(), Some("Tricuspid"));
        assert!(v.attention_pct.is_none());

        let missing = MeasurementSet::default();
        let v = ConditionEvaluator::new(&missing).evaluate(Field::AorticValveAnatomyType);
        assert_eq!(v.status, VerdictStatus::NotEligible);
    }

    #[test]
    fn results_table_follows_criteria_order() {
        let set = MeasurementSet {
            stj_diameter: Some(24.0),
            calcium_score: Some(9500.0),
            ..with_annulus(25.0)
        };
        let table = ConditionEvaluator::new(&set).generate_results_table();
        let order: Vec<&str> = table.iter().map(|r| r.criteria.key()).collect();
        assert_eq!(
            order,
            vec![
                "stjDiameter",
                "sovRightDiameter",
                "sovLeftDiameter",
                "sovNonDiameter",
                "icd4mm",
                "icd6mm",
                "icd8mm",
                "rcaHeight",
                "lcaHeight",
                "lvotDiameter",
                "ascAortaDiameter",
                "aorticValveAnatomyType",
                "calciumScore",
            ]
        );
        assert_eq!(table[0].value, Some(serde_json::json!(24.0)));
        assert_eq!(table[1].value, None);
        assert_eq!(table[12].status, VerdictStatus::AttentionRequired);
    }

    #[test]
    fn results_row_serializes_criteria_key() {
        let set = with_annulus(25.0);
        let table = ConditionEvaluator::new(&set).generate_results_table();
        let json = serde_json::to_value(&table[0]).unwrap();
        assert_eq!(json["criteria"], "stjDiameter");
        assert_eq!(json["status"], "Not Eligible");
        assert!(json["threshold"].is_null());
    }
}
