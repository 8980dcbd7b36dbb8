use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{Datelike, NaiveDate};

use crate::models::{ChildReportSet, GradeRecord, RenderedReport};

// French labels used by every rendering.
const WEEKDAYS: [&str; 7] = ["Lun", "Mar", "Mer", "Jeu", "Ven", "Sam", "Dim"];
const MONTHS: [&str; 12] = [
    "janvier", "février", "mars", "avril", "mai", "juin",
    "juillet", "août", "septembre", "octobre", "novembre", "décembre",
];
const REPORT_TITLE: &str = "Rapport de notes Pronote";
const CHAT_TITLE: &str = "📊 Rapport de notes Pronote";
const CHILD_MARKER: &str = "👧🏻";
const SUBJECT_PREFIX: &str = "Rapport Pronote";
const NO_GRADES: &str = "Aucune nouvelle note sur la période.";
const NO_DATA: &str = "Aucune donnée : aucun enfant n'est rattaché à ce compte.";
const PLACEHOLDER: &str = "—";
const RULE_WIDTH: usize = 60;
const CHAT_RULE_WIDTH: usize = 50;
const CHAT_DIVIDER_WIDTH: usize = 30;

// Builds the "Semaine du 1er mars 2024 au 15 mars 2024" header label.
pub fn week_label(start: NaiveDate, end: NaiveDate) -> String {
    format!("Semaine du {} au {}", long_date(start), long_date(end))
}

pub fn email_subject(week_label: &str) -> String {
    format!("{SUBJECT_PREFIX} — {week_label}")
}

// Renders every body of the report at once.
pub fn render(children: &ChildReportSet, week_label: &str) -> RenderedReport {
    RenderedReport {
        subject: email_subject(week_label),
        text: build_text_report(children, week_label),
        html: build_html_report(children, week_label),
        chat: build_chat_report(children, week_label),
    }
}

fn long_date(d: NaiveDate) -> String {
    let day = match d.day() {
        1 => "1er".to_string(),
        n => n.to_string(),
    };
    format!("{day} {} {}", MONTHS[d.month0() as usize], d.year())
}

fn short_date(d: Option<NaiveDate>) -> String {
    match d {
        Some(d) => format!(
            "{} {:02}/{:02}",
            WEEKDAYS[d.weekday().num_days_from_monday() as usize],
            d.day(),
            d.month()
        ),
        None => PLACEHOLDER.to_string(),
    }
}

fn day_month(d: Option<NaiveDate>) -> String {
    match d {
        Some(d) => format!("{:02}/{:02}", d.day(), d.month()),
        None => PLACEHOLDER.to_string(),
    }
}

fn score(g: &GradeRecord) -> String {
    format!(
        "{}/{}",
        g.value.as_deref().unwrap_or(PLACEHOLDER),
        g.max_value.as_deref().unwrap_or(PLACEHOLDER)
    )
}

fn coefficient(g: &GradeRecord) -> Option<&str> {
    g.coefficient.as_deref().filter(|c| *c != "1")
}

fn comment(g: &GradeRecord) -> Option<&str> {
    g.comment.as_deref().filter(|c| !c.trim().is_empty())
}

// Groups a child's grades by subject, subjects in alphabetical order,
// grades in their incoming order.
fn by_subject(grades: &[GradeRecord]) -> BTreeMap<&str, Vec<&GradeRecord>> {
    let mut groups: BTreeMap<&str, Vec<&GradeRecord>> = BTreeMap::new();
    for g in grades {
        groups.entry(subject_of(g)).or_default().push(g);
    }
    groups
}

fn subject_of(g: &GradeRecord) -> &str {
    if g.subject.trim().is_empty() {
        PLACEHOLDER
    } else {
        g.subject.as_str()
    }
}

// Coefficient, bonus marker and comment, shared by the text and chat lines.
fn push_details(line: &mut String, g: &GradeRecord) {
    if let Some(c) = coefficient(g) {
        let _ = write!(line, " (coeff {c})");
    }
    if g.is_bonus {
        line.push_str(" [BONUS]");
    }
    if let Some(c) = comment(g) {
        let _ = write!(line, " — {c}");
    }
}

fn text_grade_line(subject: &str, g: &GradeRecord) -> String {
    let mut line = format!("  {:<9}  {:<25} {}", short_date(g.date), subject, score(g));
    push_details(&mut line, g);
    line
}

fn chat_grade_line(g: &GradeRecord) -> String {
    let mut line = format!("{:<25} {}: {}", subject_of(g), day_month(g.date), score(g));
    push_details(&mut line, g);
    line
}

/// Plain-text rendering, used as the text part of the email.
pub fn build_text_report(children: &ChildReportSet, week_label: &str) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let divider = "─".repeat(RULE_WIDTH);
    let mut lines = vec![REPORT_TITLE.to_string(), week_label.to_string(), rule.clone()];

    if children.is_empty() {
        lines.push(String::new());
        lines.push(NO_DATA.to_string());
    }

    for child in children.iter() {
        lines.push(format!("\n{divider}"));
        lines.push(format!("  {}", child.name));
        lines.push(divider.clone());

        if child.grades.is_empty() {
            lines.push(format!("  {NO_GRADES}"));
            continue;
        }

        for (subject, grades) in by_subject(&child.grades) {
            lines.push(format!("\n  {subject}"));
            for g in grades {
                lines.push(text_grade_line(subject, g));
            }
        }
    }

    lines.push(format!("\n{rule}"));
    lines.join("\n")
}

/// Chat rendering: no subject grouping, grades listed newest first as
/// `Subject DD/MM: value/max`, child names in bold.
/// The rules are stripped by the chat channels before sending.
pub fn build_chat_report(children: &ChildReportSet, week_label: &str) -> String {
    let rule = "=".repeat(CHAT_RULE_WIDTH);
    let mut lines = vec![CHAT_TITLE.to_string(), week_label.to_string(), rule.clone()];

    if children.is_empty() {
        lines.push(String::new());
        lines.push(NO_DATA.to_string());
    }

    for child in children.iter() {
        lines.push(format!("\n{CHILD_MARKER} *{}*", child.name));
        lines.push("─".repeat(CHAT_DIVIDER_WIDTH));

        if child.grades.is_empty() {
            lines.push(format!("  {NO_GRADES}"));
            continue;
        }

        let mut grades: Vec<&GradeRecord> = child.grades.iter().collect();
        grades.sort_by(|a, b| b.date.cmp(&a.date));
        lines.extend(grades.into_iter().map(chat_grade_line));
    }

    lines.push(format!("\n{rule}"));
    lines.join("\n")
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn html_rows(grades: &[GradeRecord]) -> String {
    let mut rows = String::new();
    for (subject, group) in by_subject(grades) {
        for (i, g) in group.into_iter().enumerate() {
            let subject_cell = if i == 0 { format!("<b>{}</b>", escape_html(subject)) } else { String::new() };
            let mut score_cell = escape_html(&score(g));
            if g.is_bonus {
                score_cell.push_str(" <span style='color:#e67e22;font-size:11px'>[BONUS]</span>");
            }
            if let Some(c) = coefficient(g) {
                let _ = write!(score_cell, "<br><small style='color:#888'>coeff {}</small>", escape_html(c));
            }
            let comment_cell = comment(g)
                .map(|c| format!("<small style='color:#888;font-style:italic'>{}</small>", escape_html(c)))
                .unwrap_or_default();
            let _ = write!(
                rows,
                "
        <tr>
          <td style='padding:6px 12px;color:#555;border-bottom:1px solid #f0f0f0'>{subject_cell}</td>
          <td style='padding:6px 12px;border-bottom:1px solid #f0f0f0'>{date}</td>
          <td style='padding:6px 12px;text-align:center;border-bottom:1px solid #f0f0f0;font-weight:bold'>{score_cell}</td>
          <td style='padding:6px 12px;border-bottom:1px solid #f0f0f0;color:#666'>{comment_cell}</td>
        </tr>",
                date = escape_html(&short_date(g.date)),
            );
        }
    }
    rows
}

/// Markup rendering: a complete, minimal HTML document.
///
/// Every value coming from the portal goes through [`escape_html`].
pub fn build_html_report(children: &ChildReportSet, week_label: &str) -> String {
    let mut body = String::new();

    if children.is_empty() {
        let _ = write!(body, "\n  <p style='color:#888'>{}</p>", escape_html(NO_DATA));
    }

    for child in children.iter() {
        let block = if child.grades.is_empty() {
            format!("<p style='color:#888'>{}</p>", escape_html(NO_GRADES))
        } else {
            format!(
                "
    <table style='width:100%;border-collapse:collapse;font-size:14px'>
      <thead>
        <tr style='background:#f5f5f5;text-align:left'>
          <th style='padding:8px 12px;font-weight:600'>Matière</th>
          <th style='padding:8px 12px;font-weight:600'>Date</th>
          <th style='padding:8px 12px;font-weight:600;text-align:center'>Note</th>
          <th style='padding:8px 12px;font-weight:600'>Commentaire</th>
        </tr>
      </thead>
      <tbody>{}
      </tbody>
    </table>",
                html_rows(&child.grades)
            )
        };
        let _ = write!(
            body,
            "
  <div style='margin-bottom:32px'>
    <h2 style='margin:0 0 12px;color:#2c3e50;border-left:4px solid #3498db;padding-left:10px'>{}</h2>
    {block}
  </div>",
            escape_html(&child.name)
        );
    }

    format!(
        "<!DOCTYPE html>
<html lang=\"fr\">
<head><meta charset=\"UTF-8\"><title>{title}</title></head>
<body style='font-family:Arial,sans-serif;color:#333;max-width:800px;margin:auto;padding:20px'>
  <h1 style='color:#2c3e50'>Notes Pronote</h1>
  <p style='color:#888'>{label}</p>
  <hr style='border:none;border-top:2px solid #eee;margin:20px 0'>{body}
</body>
</html>",
        title = escape_html(REPORT_TITLE),
        label = escape_html(week_label),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    fn grade(subject: &str, value: &str, max: &str, on: Option<NaiveDate>) -> GradeRecord {
        GradeRecord {
            subject: subject.into(),
            value: Some(value.into()),
            max_value: Some(max.into()),
            date: on,
            ..Default::default()
        }
    }

    fn alice_and_bob() -> ChildReportSet {
        [
            ("Alice", vec![grade("Math", "14", "20", date(2024, 3, 1))]),
            ("Bob", vec![]),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn week_label_uses_full_french_month_names() {
        let label = week_label(date(2024, 2, 16).unwrap(), date(2024, 3, 1).unwrap());
        assert_eq!(label, "Semaine du 16 février 2024 au 1er mars 2024");
        assert_eq!(email_subject(&label), "Rapport Pronote — Semaine du 16 février 2024 au 1er mars 2024");
    }

    #[test]
    fn first_of_the_month_is_written_1er() {
        let label = week_label(date(2024, 2, 1).unwrap(), date(2024, 2, 15).unwrap());
        assert_eq!(label, "Semaine du 1er février 2024 au 15 février 2024");
        let label = week_label(date(2023, 12, 31).unwrap(), date(2024, 1, 11).unwrap());
        assert_eq!(label, "Semaine du 31 décembre 2023 au 11 janvier 2024");
    }

    #[test]
    fn text_report_alice_and_bob() {
        let text = build_text_report(&alice_and_bob(), "Semaine du 16 février 2024 au 1 mars 2024");

        assert!(text.starts_with("Rapport de notes Pronote\nSemaine du 16 février 2024 au 1 mars 2024\n"));
        assert!(text.contains("\n  Alice\n"));
        assert!(text.contains("  Ven 01/03  Math                      14/20"));
        let bob = text.find("  Bob\n").unwrap();
        assert!(text[bob..].contains(NO_GRADES));
        assert!(text.find("  Alice").unwrap() < bob);
    }

    #[test]
    fn empty_set_says_no_data() {
        let text = build_text_report(&ChildReportSet::new(), "label");
        assert!(text.contains(NO_DATA));
        let html = build_html_report(&ChildReportSet::new(), "label");
        assert!(html.contains(&escape_html(NO_DATA)));
        assert!(html.ends_with("</html>"));
    }

    #[test]
    fn missing_fields_render_placeholders() {
        let bare = GradeRecord::default();
        let set: ChildReportSet = [("Alice", vec![bare])].into_iter().collect();

        let text = build_text_report(&set, "label");
        assert!(text.contains("\n  —\n"));
        assert!(text.contains("—/—"));
        let html = build_html_report(&set, "label");
        assert!(html.contains("—/—"));
    }

    #[test]
    fn missing_max_uses_placeholder_and_keeps_non_numeric_value() {
        let mut g = grade("Anglais", "Abs", "", None);
        g.max_value = None;
        let set: ChildReportSet = [("Alice", vec![g])].into_iter().collect();
        assert!(build_text_report(&set, "label").contains("Abs/—"));
    }

    #[test]
    fn coefficient_bonus_and_comment() {
        let mut g = grade("Physique", "17", "20", date(2024, 3, 4));
        g.coefficient = Some("2".into());
        g.is_bonus = true;
        g.comment = Some("Très bien".into());
        let mut plain = grade("Physique", "12", "20", date(2024, 3, 5));
        plain.coefficient = Some("1".into());
        let set: ChildReportSet = [("Alice", vec![g, plain])].into_iter().collect();

        let text = build_text_report(&set, "label");
        assert!(text.contains("17/20 (coeff 2) [BONUS] — Très bien"));
        assert!(text.contains("12/20\n") || text.ends_with("12/20"));
        assert!(!text.contains("coeff 1"));
    }

    #[test]
    fn subjects_are_grouped_alphabetically() {
        let set: ChildReportSet = [(
            "Alice",
            vec![
                grade("Math", "10", "20", date(2024, 3, 1)),
                grade("Anglais", "12", "20", date(2024, 3, 2)),
                grade("Math", "15", "20", date(2024, 3, 3)),
            ],
        )]
        .into_iter()
        .collect();
        let text = build_text_report(&set, "label");

        let anglais = text.find("\n  Anglais\n").unwrap();
        let math = text.find("\n  Math\n").unwrap();
        assert!(anglais < math);
        assert!(text.find("10/20").unwrap() < text.find("15/20").unwrap());
    }

    #[test]
    fn html_escapes_portal_content() {
        let mut g = grade("R&D <lab>", "14", "20", date(2024, 3, 1));
        g.comment = Some("\"bien\" <script>".into());
        let set: ChildReportSet = [("Tom & Jerry", vec![g])].into_iter().collect();

        let html = build_html_report(&set, "label <b>");
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("Tom &amp; Jerry"));
        assert!(html.contains("R&amp;D &lt;lab&gt;"));
        assert!(html.contains("&quot;bien&quot; &lt;script&gt;"));
        assert!(html.contains("label &lt;b&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn html_marks_children_without_grades() {
        let html = build_html_report(&alice_and_bob(), "label");
        assert!(html.contains(">Alice</h2>"));
        assert!(html.contains(">Bob</h2>"));
        assert!(html.contains(NO_GRADES));
        assert!(html.contains("14/20"));
    }

    #[test]
    fn chat_report_lists_grades_newest_first_without_grouping() {
        let mut bonus = grade("Physique", "17", "20", date(2024, 3, 4));
        bonus.coefficient = Some("2".into());
        bonus.is_bonus = true;
        let set: ChildReportSet = [
            (
                "Alice",
                vec![
                    grade("Math", "10", "20", date(2024, 3, 1)),
                    bonus,
                    grade("Anglais", "Abs", "20", None),
                ],
            ),
            ("Bob", vec![]),
        ]
        .into_iter()
        .collect();

        let chat = build_chat_report(&set, "Semaine du 1er mars 2024 au 15 mars 2024");
        let lines: Vec<&str> = chat.lines().collect();

        assert_eq!(lines[0], "📊 Rapport de notes Pronote");
        assert_eq!(lines[1], "Semaine du 1er mars 2024 au 15 mars 2024");
        assert!(chat.contains("\n👧🏻 *Alice*\n"));
        assert!(chat.contains("\n👧🏻 *Bob*\n"));
        let physique = chat.find("Physique                  04/03: 17/20 (coeff 2) [BONUS]").unwrap();
        let math = chat.find("Math                      01/03: 10/20").unwrap();
        let anglais = chat.find("Anglais                   —: Abs/20").unwrap();
        assert!(physique < math && math < anglais);
        assert!(chat[chat.find("*Bob*").unwrap()..].contains(NO_GRADES));
    }

    #[test]
    fn chat_report_without_children() {
        let chat = build_chat_report(&ChildReportSet::new(), "label");
        assert!(chat.contains(NO_DATA));
        assert!(!chat.contains(CHILD_MARKER));
    }

    #[test]
    fn rendering_is_deterministic() {
        let set = alice_and_bob();
        assert_eq!(render(&set, "label"), render(&set, "label"));
        assert!(render(&set, "label").chat.starts_with(CHAT_TITLE));
    }
}
