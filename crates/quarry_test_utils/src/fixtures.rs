//! HTML fixture builders matching the seed source selector sets.

/// One quiz question block for the static source fixtures.
pub struct QuizFixture<'a> {
    pub text: &'a str,
    pub options: &'a [&'a str],
    /// Answer letter, e.g. "B".
    pub answer: &'a str,
    pub explanation: Option<&'a str>,
}

/// A quiz-list page in the shape the `quizpages` selectors expect.
pub fn quiz_page(questions: &[QuizFixture<'_>], next_href: Option<&str>) -> String {
    let mut body = String::from("<html><body><main>\n");
    for q in questions {
        body.push_str("<div class=\"quiz-question\">\n");
        body.push_str(&format!("  <p class=\"q-text\">{}</p>\n", q.text));
        body.push_str("  <ol class=\"q-options\">\n");
        for (i, option) in q.options.iter().enumerate() {
            let letter = (b'A' + i as u8) as char;
            body.push_str(&format!("    <li>{letter}) {option}</li>\n"));
        }
        body.push_str("  </ol>\n");
        body.push_str(&format!(
            "  <span class=\"q-answer\">Answer: {}</span>\n",
            q.answer
        ));
        if let Some(explanation) = q.explanation {
            body.push_str(&format!(
                "  <div class=\"q-explanation\">{explanation}</div>\n"
            ));
        }
        body.push_str("</div>\n");
    }
    if let Some(href) = next_href {
        body.push_str(&format!("<a class=\"next-page\" href=\"{href}\">Next</a>\n"));
    }
    body.push_str("</main></body></html>");
    body
}

/// One article card for the dynamic source fixtures.
pub struct ArticleFixture<'a> {
    pub title: &'a str,
    pub options: &'a [&'a str],
    pub answer: &'a str,
    pub explanation: Option<&'a str>,
    pub code: Option<&'a str>,
}

/// An article page in the shape the `prepstream` selectors expect.
pub fn article_page(cards: &[ArticleFixture<'_>]) -> String {
    let mut body = String::from("<html><body><div id=\"feed\">\n");
    for card in cards {
        body.push_str("<article class=\"question-card\">\n");
        body.push_str(&format!(
            "  <h2 class=\"question-title\">{}</h2>\n",
            card.title
        ));
        if let Some(code) = card.code {
            body.push_str(&format!("  <pre><code>{code}</code></pre>\n"));
        }
        body.push_str("  <ul class=\"choices\">\n");
        for option in card.options {
            body.push_str(&format!("    <li>{option}</li>\n"));
        }
        body.push_str("  </ul>\n");
        body.push_str(&format!(
            "  <div class=\"answer-reveal\">Answer: {}</div>\n",
            card.answer
        ));
        if let Some(explanation) = card.explanation {
            body.push_str(&format!(
                "  <div class=\"explanation\">{explanation}</div>\n"
            ));
        }
        body.push_str("</article>\n");
    }
    body.push_str("</div></body></html>");
    body
}

/// A quiz page rendered straight from [`sample_question_bank`] rows.
pub fn quiz_page_from_bank(
    bank: &[(String, Vec<String>, String, String)],
    next_href: Option<&str>,
) -> String {
    let borrowed: Vec<Vec<&str>> = bank
        .iter()
        .map(|(_, options, _, _)| options.iter().map(String::as_str).collect())
        .collect();
    let fixtures: Vec<QuizFixture<'_>> = bank
        .iter()
        .zip(&borrowed)
        .map(|((text, _, answer, explanation), options)| QuizFixture {
            text,
            options,
            answer,
            explanation: Some(explanation),
        })
        .collect();
    quiz_page(&fixtures, next_href)
}

/// A bot-wall challenge page.
pub fn challenge_page() -> String {
    "<html><body><h1>One more step</h1><p>Verify you are human to continue.</p></body></html>"
        .to_string()
}

/// A page whose DOM no longer matches the configured selectors.
pub fn drifted_page() -> String {
    "<html><body><div class=\"totally-new-layout\"><p>We redesigned!</p></div></body></html>"
        .to_string()
}

/// Hand-written, semantically distinct questions so embedding-based
/// dedup does not collapse unrelated fixtures. (text, options, answer
/// letter, explanation)
pub fn sample_question_bank() -> Vec<(String, Vec<String>, String, String)> {
    let raw: &[(&str, [&str; 4], &str, &str)] = &[
        (
            "A train covers 60 km in 45 minutes. What is its average speed in km per hour?",
            ["70", "75", "80", "90"],
            "C",
            "Speed equals 60 divided by 0.75 hours.",
        ),
        (
            "Which number completes the series 3, 6, 12, 24, ...?",
            ["36", "40", "48", "60"],
            "C",
            "Each term doubles the previous one.",
        ),
        (
            "If the ratio of cats to dogs is 3 to 5 and there are 40 animals, how many dogs are there?",
            ["15", "20", "25", "30"],
            "C",
            "Five eighths of forty is twenty five.",
        ),
        (
            "Pick the synonym of the word abundant from the choices below.",
            ["scarce", "plentiful", "modest", "fragile"],
            "B",
            "Abundant means existing in large quantities.",
        ),
        (
            "A shopkeeper buys a chair for 400 and sells it for 460. What is the profit percentage?",
            ["10 percent", "12 percent", "15 percent", "18 percent"],
            "C",
            "Profit of 60 on 400 is fifteen percent.",
        ),
        (
            "What is the angle between the hands of a clock at three o'clock exactly?",
            ["45 degrees", "60 degrees", "90 degrees", "120 degrees"],
            "C",
            "The hour hand sits a quarter turn from twelve.",
        ),
        (
            "Simple interest on 5000 at 8 percent per year for two years amounts to how much?",
            ["400", "600", "800", "1000"],
            "C",
            "Interest is principal times rate times time.",
        ),
        (
            "Choose the conclusion that follows: all roses are flowers, some flowers fade quickly.",
            [
                "all roses fade quickly",
                "some roses are not flowers",
                "no certain conclusion about roses fading",
                "flowers never fade",
            ],
            "C",
            "The middle term is undistributed, so nothing follows about roses fading.",
        ),
        (
            "A tank fills in 6 hours through one pipe and empties in 9 hours through another. Both open, how long to fill?",
            ["12 hours", "15 hours", "18 hours", "21 hours"],
            "C",
            "Net rate is one sixth minus one ninth, one eighteenth per hour.",
        ),
        (
            "In a certain code, PENCIL is written as QFODJM. How is MARKER written?",
            ["NBSLFS", "NBSKFS", "LBSLFS", "NASLFS"],
            "A",
            "Every letter shifts forward by one position.",
        ),
        (
            "The average of five consecutive odd numbers is 21. What is the largest of them?",
            ["23", "25", "27", "29"],
            "B",
            "The middle value is 21, so the run ends at 25.",
        ),
        (
            "How many squares of side 2 cm fit inside a rectangle of 8 cm by 6 cm?",
            ["10", "12", "14", "16"],
            "B",
            "Area 48 divided by 4 gives twelve squares.",
        ),
    ];
    raw.iter()
        .map(|(text, options, answer, explanation)| {
            (
                (*text).to_string(),
                options.iter().map(|o| (*o).to_string()).collect(),
                (*answer).to_string(),
                (*explanation).to_string(),
            )
        })
        .collect()
}
