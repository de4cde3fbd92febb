// Reader for saved survey result pages.
//
// A result page is expected to carry, in document order: a date line, a
// self-referencing result link with the survey id, one heading per
// sub-question, and one anchor + response span per (responder,
// sub-question) pair, grouped in one run of responders per sub-question.
// Anything that deviates from this schema fails the page instead of
// producing silently misaligned records.

use regex::Regex;

use crate::pipeline::*;

/// Marker phrase opening the commentary clause that some questions carry
/// about an earlier vote. The clause is not part of the statement being
/// scored and is stripped from the display text.
const PRIOR_VOTE_MARKER: &str = "This question refers to";

/// One page, parsed but not yet folded into a dataset table.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ParsedPage {
    pub year: i32,
    /// The survey id taken from the page's own result link.
    pub url_suffix: String,
    /// Cleaned sub-question texts, in document order, without the
    /// numbering prefix (numbering is a dataset-level concern).
    pub questions: Vec<String>,
    /// (responder id, responder name, response label) in document order;
    /// the rows for sub-question `i` are the `i`-th run of
    /// `rows.len() / questions.len()` entries.
    pub rows: Vec<(String, String, String)>,
}

/// The compiled page schema.
pub struct PageSchema {
    date: Regex,
    survey: Regex,
    question: Regex,
    responder: Regex,
    response: Regex,
    markup: Regex,
    link: Regex,
}

impl PageSchema {
    pub fn new() -> PageSchema {
        PageSchema {
            date: Regex::new(r#"surveyDate">[^<]*?(\d{4})"#).unwrap(),
            survey: Regex::new(r"results\?SurveyID=([A-Za-z0-9_]+)").unwrap(),
            question: Regex::new(r#"surveyQuestion">([\s\S]+?)</h3>"#).unwrap(),
            responder: Regex::new(r#"\?id=(\d+)">([^<]+?)</a>"#).unwrap(),
            response: Regex::new(r#"<span class="option-\d+">([^<]+?)</span>"#).unwrap(),
            markup: Regex::new(r"<[^>]*>").unwrap(),
            link: Regex::new(r#"<h2><a href="(\S+?results\?SurveyID=\S+?)""#).unwrap(),
        }
    }

    /// The dataset year of a page. Kept separate from [PageSchema::parse_page]
    /// so that a later parse failure can still be pinned on its dataset.
    pub fn page_year(&self, page: &str, contents: &str) -> MapResult<i32> {
        let caps = self
            .date
            .captures(contents)
            .context(PageParseSnafu { page })?;
        Ok(caps[1].parse().unwrap())
    }

    /// Parses one page into question texts and response rows. Nothing is
    /// emitted on failure; the caller never sees a partial page.
    pub fn parse_page(&self, page: &str, contents: &str) -> MapResult<ParsedPage> {
        let year = self.page_year(page, contents)?;
        let url_suffix = self
            .survey
            .captures(contents)
            .map(|c| c[1].to_string())
            .context(PageParseSnafu { page })?;

        let questions: Vec<String> = self
            .question
            .captures_iter(contents)
            .map(|c| self.clean_question(&c[1]))
            .collect();
        let responders: Vec<(String, String)> = self
            .responder
            .captures_iter(contents)
            .map(|c| (c[1].to_string(), collapse_whitespace(&c[2])))
            .collect();
        let responses: Vec<String> = self
            .response
            .captures_iter(contents)
            .map(|c| c[1].trim().to_string())
            .collect();
        debug!(
            "parse_page: {}: {} questions, {} responders, {} responses",
            page,
            questions.len(),
            responders.len(),
            responses.len()
        );

        if questions.is_empty() || responses.is_empty() || responders.len() != responses.len() {
            return PageParseSnafu { page }.fail();
        }
        // The division contract: responders per question must be exact.
        if responses.len() % questions.len() != 0 {
            return StructuralMismatchSnafu {
                page,
                responses: responses.len(),
                questions: questions.len(),
            }
            .fail();
        }

        let rows: Vec<(String, String, String)> = responders
            .into_iter()
            .zip(responses)
            .map(|((id, name), label)| (id, name, label))
            .collect();
        Ok(ParsedPage {
            year,
            url_suffix,
            questions,
            rows,
        })
    }

    /// Survey result links found on a saved index page, in document order.
    pub fn extract_result_links(&self, contents: &str) -> Vec<String> {
        self.link
            .captures_iter(contents)
            .map(|c| c[1].to_string())
            .collect()
    }

    /// Removes markup and entities, collapses whitespace and drops the
    /// trailing prior-vote commentary clause.
    fn clean_question(&self, raw: &str) -> String {
        let no_tags = self.markup.replace_all(raw, "");
        let decoded = no_tags.replace("&nbsp;", " ").replace("&amp;", "&");
        let collapsed = collapse_whitespace(&decoded);
        match collapsed.find(PRIOR_VOTE_MARKER) {
            Some(idx) => collapsed[..idx].trim_end().to_string(),
            None => collapsed,
        }
    }
}

impl Default for PageSchema {
    fn default() -> Self {
        Self::new()
    }
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<&str>>().join(" ")
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub const PAGE_TWO_QUESTIONS: &str = r#"<html><head><title>Poll Results</title></head><body>
<h3 class="surveyDate">Tuesday, September 2nd, 2014</h3>
<h2><a href="/surveys/results?SurveyID=SV_123">Minimum Wage</a></h2>
<h3 class="surveyQuestion">Question A:<br /> Raising the federal minimum wage
	would&nbsp;make it noticeably harder for
	low-skilled workers to find employment.</h3>
<table>
<tr><td><a href="/economic-experts-panel?id=101">Alice Adams</a></td><td><span class="option-4">Agree</span></td></tr>
<tr><td><a href="/economic-experts-panel?id=102">Bob Brown</a></td><td><span class="option-2">Disagree</span></td></tr>
<tr><td><a href="/economic-experts-panel?id=103">Carol Clark</a></td><td><span class="option-3">Uncertain</span></td></tr>
</table>
<h3 class="surveyQuestion">Question B: The distortionary costs of raising
revenue are small. This question refers to an earlier vote on the same panel.</h3>
<table>
<tr><td><a href="/economic-experts-panel?id=101">Alice Adams</a></td><td><span class="option-5">Strongly Agree</span></td></tr>
<tr><td><a href="/economic-experts-panel?id=102">Bob Brown</a></td><td><span class="option-6">No Opinion</span></td></tr>
<tr><td><a href="/economic-experts-panel?id=103">Carol Clark</a></td><td><span class="option-4">Agree</span></td></tr>
</table>
</body></html>
"#;

    /// Builds a minimal page with the given questions and response rows
    /// (rows listed as consecutive per-question runs).
    pub fn page_fixture(
        survey_id: &str,
        questions: &[&str],
        rows: &[(&str, &str, &str)],
    ) -> String {
        let mut s = String::new();
        s.push_str("<html><body>\n");
        s.push_str("<h3 class=\"surveyDate\">Tuesday, September 2nd, 2014</h3>\n");
        s.push_str(&format!(
            "<h2><a href=\"/surveys/results?SurveyID={}\">Survey</a></h2>\n",
            survey_id
        ));
        for q in questions {
            s.push_str(&format!("<h3 class=\"surveyQuestion\">{}</h3>\n", q));
        }
        for (id, name, label) in rows {
            s.push_str(&format!(
                "<tr><td><a href=\"/economic-experts-panel?id={}\">{}</a></td><td><span class=\"option-1\">{}</span></td></tr>\n",
                id, name, label
            ));
        }
        s.push_str("</body></html>\n");
        s
    }

    #[test]
    fn parses_questions_responders_and_year() {
        let page = PageSchema::new()
            .parse_page("fixture", PAGE_TWO_QUESTIONS)
            .unwrap();
        assert_eq!(page.year, 2014);
        assert_eq!(page.url_suffix, "SV_123");
        assert_eq!(page.questions.len(), 2);
        // Markup removed, entities decoded, whitespace collapsed.
        assert_eq!(
            page.questions[0],
            "Question A: Raising the federal minimum wage would make it \
             noticeably harder for low-skilled workers to find employment."
        );
        assert_eq!(page.rows.len(), 6);
        assert_eq!(
            page.rows[0],
            (
                "101".to_string(),
                "Alice Adams".to_string(),
                "Agree".to_string()
            )
        );
        assert_eq!(page.rows[4].2, "No Opinion");
    }

    #[test]
    fn prior_vote_clause_is_stripped() {
        let page = PageSchema::new()
            .parse_page("fixture", PAGE_TWO_QUESTIONS)
            .unwrap();
        assert_eq!(
            page.questions[1],
            "Question B: The distortionary costs of raising revenue are small."
        );
    }

    #[test]
    fn missing_markers_fail_the_page() {
        let schema = PageSchema::new();
        assert!(matches!(
            schema.parse_page("empty", "<html></html>"),
            Err(MapError::PageParse { .. })
        ));
        // A date alone is not enough: no question or response blocks.
        let date_only = "<h3 class=\"surveyDate\">March 3, 2015</h3>";
        assert_eq!(schema.page_year("p", date_only).unwrap(), 2015);
        assert!(matches!(
            schema.parse_page("p", date_only),
            Err(MapError::PageParse { .. })
        ));
    }

    #[test]
    fn uneven_response_count_is_a_structural_mismatch() {
        // 5 response rows over 2 declared sub-questions.
        let contents = page_fixture(
            "SV_55",
            &["First.", "Second."],
            &[
                ("1", "A A", "Agree"),
                ("2", "B B", "Agree"),
                ("3", "C C", "Agree"),
                ("4", "D D", "Agree"),
                ("5", "E E", "Agree"),
            ],
        );
        let res = PageSchema::new().parse_page("fixture", &contents);
        assert!(matches!(
            res,
            Err(MapError::StructuralMismatch {
                responses: 5,
                questions: 2,
                ..
            })
        ));
    }

    #[test]
    fn responder_and_response_counts_must_agree() {
        let mut contents = page_fixture("SV_56", &["Only one."], &[("1", "A A", "Agree")]);
        // An extra response span with no matching responder anchor.
        contents.push_str("<span class=\"option-2\">Disagree</span>\n");
        let res = PageSchema::new().parse_page("fixture", &contents);
        assert!(matches!(res, Err(MapError::PageParse { .. })));
    }

    #[test]
    fn index_links_are_extracted_in_order() {
        let index = r#"<html><body>
<h2><a href="/surveys/results?SurveyID=SV_1">First survey</a></h2>
<p>filler</p>
<h2><a href="/surveys/results?SurveyID=SV_2">Second survey</a></h2>
</body></html>"#;
        let links = PageSchema::new().extract_result_links(index);
        assert_eq!(
            links,
            vec![
                "/surveys/results?SurveyID=SV_1".to_string(),
                "/surveys/results?SurveyID=SV_2".to_string(),
            ]
        );
    }
}
