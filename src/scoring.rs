//! Evaluation scoring.
//!
//! Combines the four check categories into a weighted 0-100 score:
//! 10 points for the license check, README quality at 20%, code quality at
//! 30%, and the functional check pass ratio at 40%. Pass threshold is 70.

use crate::types::CheckResult;

/// Minimum overall score counted as a pass.
pub const PASS_THRESHOLD: u32 = 70;

const LICENSE_POINTS: f64 = 10.0;
const README_WEIGHT: f64 = 0.2;
const CODE_WEIGHT: f64 = 0.3;
const FUNCTIONAL_POINTS: f64 = 40.0;

/// Weighted overall score, rounded to the nearest integer and clamped to
/// 0-100. Quality inputs are 0-100 scores; an empty check list contributes
/// zero functional points.
pub fn overall_score(
    license_ok: bool,
    readme_quality: f64,
    code_quality: f64,
    checks: &[CheckResult],
) -> u32 {
    let license = if license_ok { LICENSE_POINTS } else { 0.0 };
    let readme = readme_quality.clamp(0.0, 100.0) * README_WEIGHT;
    let code = code_quality.clamp(0.0, 100.0) * CODE_WEIGHT;
    let functional = if checks.is_empty() {
        0.0
    } else {
        let passed = checks.iter().filter(|c| c.passed).count() as f64;
        passed / checks.len() as f64 * FUNCTIONAL_POINTS
    };

    (license + readme + code + functional).round().clamp(0.0, 100.0) as u32
}

pub fn is_passing(score: u32) -> bool {
    score >= PASS_THRESHOLD
}

/// Markdown feedback summarizing every check category, with improvement
/// hints for anything below par.
pub fn generate_feedback(
    license_ok: bool,
    readme_quality: f64,
    code_quality: f64,
    checks: &[CheckResult],
) -> String {
    let mut feedback = String::from("## Evaluation Feedback\n\n");

    feedback.push_str(&format!(
        "### License Check: {}\n",
        if license_ok { "PASS" } else { "FAIL" }
    ));
    if !license_ok {
        feedback.push_str("Please add an MIT LICENSE file to your repository.\n");
    }
    feedback.push('\n');

    feedback.push_str(&format!("### README Quality: {:.0}/100\n", readme_quality));
    if readme_quality < PASS_THRESHOLD as f64 {
        feedback.push_str(
            "Consider improving your README with better documentation, setup instructions, \
             and code explanations.\n",
        );
    }
    feedback.push('\n');

    feedback.push_str(&format!("### Code Quality: {:.0}/100\n", code_quality));
    if code_quality < PASS_THRESHOLD as f64 {
        feedback.push_str("Focus on code structure, comments, and following best practices.\n");
    }
    feedback.push('\n');

    feedback.push_str("### Functionality Checks:\n");
    for check in checks {
        feedback.push_str(&format!(
            "- {}: {}\n",
            check.name,
            if check.passed { "PASS" } else { "FAIL" }
        ));
        if !check.passed {
            feedback.push_str(&format!("  {}\n", check.details));
        }
    }

    feedback
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checks(outcomes: &[bool]) -> Vec<CheckResult> {
        outcomes
            .iter()
            .enumerate()
            .map(|(i, &passed)| CheckResult {
                name: format!("check-{i}"),
                passed,
                details: String::new(),
            })
            .collect()
    }

    #[test]
    fn test_weighted_score() {
        // 10 + 80*0.2 + 90*0.3 + 3/4*40 = 10 + 16 + 27 + 30 = 83
        let results = checks(&[true, true, true, false]);
        let score = overall_score(true, 80.0, 90.0, &results);
        assert_eq!(score, 83);
        assert!(is_passing(score));
    }

    #[test]
    fn test_everything_failing_scores_zero() {
        let results = checks(&[false]);
        let score = overall_score(false, 0.0, 0.0, &results);
        assert_eq!(score, 0);
        assert!(!is_passing(score));
    }

    #[test]
    fn test_no_checks_contribute_nothing() {
        let score = overall_score(true, 100.0, 100.0, &[]);
        assert_eq!(score, 60); // 10 + 20 + 30, no functional points
        assert!(!is_passing(score));
    }

    #[test]
    fn test_perfect_score() {
        let results = checks(&[true, true]);
        assert_eq!(overall_score(true, 100.0, 100.0, &results), 100);
    }

    #[test]
    fn test_quality_inputs_clamped() {
        let results = checks(&[true]);
        assert_eq!(overall_score(true, 250.0, 250.0, &results), 100);
        assert_eq!(overall_score(false, -10.0, -10.0, &results), 40);
    }

    #[test]
    fn test_threshold_boundary() {
        assert!(is_passing(70));
        assert!(!is_passing(69));
    }

    #[test]
    fn test_feedback_sections() {
        let results = checks(&[true, false]);
        let feedback = generate_feedback(false, 50.0, 90.0, &results);

        assert!(feedback.contains("### License Check: FAIL"));
        assert!(feedback.contains("MIT LICENSE"));
        assert!(feedback.contains("### README Quality: 50/100"));
        assert!(feedback.contains("### Code Quality: 90/100"));
        assert!(feedback.contains("- check-0: PASS"));
        assert!(feedback.contains("- check-1: FAIL"));
    }
}
