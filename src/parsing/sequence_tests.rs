use crate::models::field::{FieldKind, SurveyClass};
use crate::parsing::sequence::parse_sequence;

#[test]
fn parses_basic_records() {
    let text = "\
# nightly darks then a sky pair
0.0 0.0 N 60 9600 3 0
3.5 10.0 Y 60 3600 3 2 # pair_a
3.533 10.0 y 60 3600 3 2 # pair_b
";
    let load = parse_sequence(text, 0, 0);
    assert_eq!(load.fields.len(), 3);

    let dark = &load.fields[0];
    assert_eq!(dark.kind, FieldKind::Dark);
    assert!((dark.interval_hours - 9600.0 / 3600.0).abs() < 1e-12);
    assert_eq!(dark.n_required, 3);

    let sky = &load.fields[1];
    assert_eq!(sky.kind, FieldKind::Sky);
    assert_eq!(sky.survey, SurveyClass::SNe);
    assert_eq!(sky.line_number, 3);
    assert_eq!(sky.comment_tail(), Some(" pair_a"));
    assert!(sky.script_line.contains("# pair_a"));
}

#[test]
fn rejects_out_of_range_records() {
    let text = "\
25.0 0.0 Y 60 3600 3 0
3.5 95.0 Y 60 3600 3 0
3.5 10.0 Y 2000 3600 3 0
3.5 10.0 Y 60 100 3 0
3.5 10.0 Y 60 3600 0 0
3.5 10.0 Q 60 3600 3 0
3.5 10.0 Y 60 3600 3 9
3.5 10.0 Y 60 3600 3 0
";
    let load = parse_sequence(text, 0, 0);
    // only the last line is valid
    assert_eq!(load.fields.len(), 1);
    assert_eq!(load.fields[0].line_number, 8);
}

#[test]
fn focus_record_needs_trailing_floats() {
    let no_floats = "12.0 0.0 F 30 3600 5 0";
    assert!(parse_sequence(no_floats, 0, 0).fields.is_empty());

    let ok = "12.0 0.0 F 30 3600 5 0 0.05 25.30";
    let load = parse_sequence(ok, 0, 0);
    assert_eq!(load.fields.len(), 1);
    let plan = load.fields[0].focus.unwrap();
    assert!((plan.increment_mm - 0.05).abs() < 1e-12);
    assert!((plan.default_mm - 25.30).abs() < 1e-12);

    let bad_increment = "12.0 0.0 F 30 3600 5 0 0.5 25.30";
    assert!(parse_sequence(bad_increment, 0, 0).fields.is_empty());
}

#[test]
fn filter_lines_set_current_filter() {
    let text = "\
FILTER rgzz
3.5 10.0 Y 60 3600 3 0
";
    let load = parse_sequence(text, 0, 0);
    assert_eq!(load.filter.as_deref(), Some("rgzz"));
    assert_eq!(load.fields.len(), 1);
}

#[test]
fn survey_code_four_becomes_must_do() {
    let load = parse_sequence("3.5 10.0 Y 60 3600 3 4", 0, 0);
    assert_eq!(load.fields[0].survey, SurveyClass::MustDo);
}

#[test]
fn skip_lines_supports_growing_sidecar() {
    let first = "3.5 10.0 Y 60 3600 3 0\n";
    let load = parse_sequence(first, 0, 0);
    assert_eq!(load.lines_read, 1);

    let grown = "3.5 10.0 Y 60 3600 3 0\n4.5 10.0 Y 60 3600 3 0\n";
    let appended = parse_sequence(grown, 7, load.lines_read);
    assert_eq!(appended.fields.len(), 1);
    assert_eq!(appended.fields[0].field_number, 7);
    assert!((appended.fields[0].ra - 4.5).abs() < 1e-12);
}
