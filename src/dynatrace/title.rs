//! Tile title and markdown grammars.
//!
//! Tile titles carry per-SLI settings as `;`-separated `key=value` pairs:
//! `Response time (P95);sli=svc_rt_p95;pass=<+10%,<600;warning=<1000;weight=2;key=true`
//! Markdown tiles carry dashboard-wide SLO settings the same way, with
//! `kqg.`-prefixed keys. Title keys are matched case-sensitively, markdown
//! keys are case-folded.

use crate::events::{ServiceLevelObjectives, SloCriteria};

/// Per-tile settings parsed from a title. A tile without `sli=` contributes
/// nothing; callers check `sli_name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileParams {
    pub sli_name: String,
    pub pass: Vec<SloCriteria>,
    pub warning: Vec<SloCriteria>,
    pub weight: i32,
    pub key_sli: bool,
}

/// Parses a tile title. Each `pass=`/`warning=` occurrence contributes one
/// criteria group (its value split on commas); `default_pass` /
/// `default_warning` apply when the title specifies none at all.
pub fn parse_tile_title(title: &str, default_pass: &[String], default_warning: &[String]) -> TileParams {
    let mut params = TileParams {
        weight: 1,
        ..TileParams::default()
    };

    for fragment in title.split(';') {
        let (key, value) = match fragment.find('=') {
            Some(idx) => (&fragment[..idx], &fragment[idx + 1..]),
            None => continue,
        };
        match key {
            "sli" => params.sli_name = value.to_string(),
            "pass" => params.pass.push(criteria_group(value)),
            "warning" => params.warning.push(criteria_group(value)),
            "key" => params.key_sli = value.parse().unwrap_or(false),
            "weight" => {
                if let Ok(weight) = value.parse() {
                    params.weight = weight;
                }
            }
            _ => {}
        }
    }

    if params.pass.is_empty() && !default_pass.is_empty() {
        params.pass.push(SloCriteria {
            criteria: default_pass.to_vec(),
        });
    }
    if params.warning.is_empty() && !default_warning.is_empty() {
        params.warning.push(SloCriteria {
            criteria: default_warning.to_vec(),
        });
    }

    params
}

fn criteria_group(value: &str) -> SloCriteria {
    SloCriteria {
        criteria: value.split(',').map(str::to_string).collect(),
    }
}

/// Applies `kqg.*` settings from a markdown tile to the SLO header.
/// Unrecognized values collapse to their defaults rather than erroring.
pub fn parse_markdown_configuration(markdown: &str, slo: &mut ServiceLevelObjectives) {
    for fragment in markdown.split(';') {
        let parts: Vec<&str> = fragment.split('=').collect();
        if parts.len() != 2 {
            continue;
        }
        let key = parts[0].to_lowercase();
        let value = parts[1];

        match key.as_str() {
            "kqg.total.pass" => slo.total_score.pass = value.to_string(),
            "kqg.total.warning" => slo.total_score.warning = value.to_string(),
            "kqg.compare.withscore" => {
                slo.comparison.include_result_with_score =
                    if matches!(value, "pass" | "pass_or_warn" | "all") {
                        value.to_string()
                    } else {
                        "pass".to_string()
                    };
            }
            "kqg.compare.results" => {
                let count = value.parse().unwrap_or(1);
                slo.comparison.number_of_comparison_results = count;
                slo.comparison.compare_with = if count > 1 {
                    "several_results".to_string()
                } else {
                    "single_result".to_string()
                };
            }
            "kqg.compare.function" => {
                slo.comparison.aggregate_function =
                    if matches!(value, "avg" | "p50" | "p90" | "p95") {
                        value.to_string()
                    } else {
                        "avg".to_string()
                    };
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_title() {
        let params = parse_tile_title(
            "Some description;sli=teststep_rt;pass=<500ms,<+10%;warning=<1000ms,<+20%;weight=1;key=true",
            &[],
            &[],
        );
        assert_eq!(params.sli_name, "teststep_rt");
        assert_eq!(params.pass, vec![SloCriteria { criteria: vec!["<500ms".into(), "<+10%".into()] }]);
        assert_eq!(params.warning, vec![SloCriteria { criteria: vec!["<1000ms".into(), "<+20%".into()] }]);
        assert_eq!(params.weight, 1);
        assert!(params.key_sli);
    }

    #[test]
    fn test_title_without_sli_field() {
        let params = parse_tile_title("Host Disk Queue Length (max)", &[], &[]);
        assert!(params.sli_name.is_empty());
        assert!(params.pass.is_empty());
        assert_eq!(params.weight, 1);
        assert!(!params.key_sli);
    }

    #[test]
    fn test_repeated_pass_fragments_build_groups() {
        let params = parse_tile_title("t;sli=rt;pass=<500;pass=<+10%", &[], &[]);
        assert_eq!(params.pass.len(), 2);
        assert_eq!(params.pass[0].criteria, vec!["<500"]);
        assert_eq!(params.pass[1].criteria, vec!["<+10%"]);
    }

    #[test]
    fn test_defaults_apply_only_when_absent() {
        let defaults = vec!["<600".to_string()];
        let params = parse_tile_title("t;sli=rt", &defaults, &defaults);
        assert_eq!(params.pass[0].criteria, vec!["<600"]);
        assert_eq!(params.warning[0].criteria, vec!["<600"]);

        let params = parse_tile_title("t;sli=rt;pass=<100", &defaults, &defaults);
        assert_eq!(params.pass[0].criteria, vec!["<100"]);
        assert_eq!(params.warning[0].criteria, vec!["<600"]);
    }

    #[test]
    fn test_title_keys_are_case_sensitive() {
        let params = parse_tile_title("t;SLI=rt;Pass=<100", &[], &[]);
        assert!(params.sli_name.is_empty());
        assert!(params.pass.is_empty());
    }

    #[test]
    fn test_markdown_sets_slo_header() {
        let mut slo = ServiceLevelObjectives::default();
        parse_markdown_configuration(
            "KQG.Total.Pass=90%;KQG.Total.Warning=75%;KQG.Compare.WithScore=pass_or_warn;KQG.Compare.Results=3;KQG.Compare.Function=p90",
            &mut slo,
        );
        assert_eq!(slo.total_score.pass, "90%");
        assert_eq!(slo.comparison.include_result_with_score, "pass_or_warn");
        assert_eq!(slo.comparison.number_of_comparison_results, 3);
        assert_eq!(slo.comparison.compare_with, "several_results");
        assert_eq!(slo.comparison.aggregate_function, "p90");
    }

    #[test]
    fn test_markdown_invalid_values_collapse_to_defaults() {
        let mut slo = ServiceLevelObjectives::default();
        parse_markdown_configuration(
            "kqg.compare.withscore=sometimes;kqg.compare.results=many;kqg.compare.function=max",
            &mut slo,
        );
        assert_eq!(slo.comparison.include_result_with_score, "pass");
        assert_eq!(slo.comparison.number_of_comparison_results, 1);
        assert_eq!(slo.comparison.compare_with, "single_result");
        assert_eq!(slo.comparison.aggregate_function, "avg");
    }
}
