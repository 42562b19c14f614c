//! Terminal question-answer loop.
//!
//! Every line is a question, except for the commands:
//!
//! - `check`: look for new patients;
//! - `stats`: print the statistics;
//! - `patient <id>` / `patient`: scope the following questions to a patient, or clear it;
//! - `quit` / `exit`.

use std::error::Error;
use std::io::{BufRead, Write};

use crossterm::queue;
use crossterm::style::{Attribute, Color, Print, SetAttribute, SetForegroundColor};

use crate::service::{ChatRequest, MediRag};

const PROMPT: &str = "\nVous: ";

enum Line<'a> {
    Quit,
    Check,
    Stats,
    Scope(Option<&'a str>),
    Question(&'a str),
    Blank,
}

fn parse_line(line: &str) -> Line<'_> {
    let line = line.trim();
    match line.to_lowercase().as_str() {
        "" => Line::Blank,
        "quit" | "exit" | "q" => Line::Quit,
        "check" => Line::Check,
        "stats" => Line::Stats,
        "patient" => Line::Scope(None),
        lower if lower.starts_with("patient ") => {
            Line::Scope(line.split_once(' ').map(|(_, id)| id.trim()))
        }
        _ => Line::Question(line),
    }
}

fn print_colored<W: Write>(out: &mut W, color: Color, text: &str) -> Result<(), Box<dyn Error>> {
    queue!(
        out,
        SetForegroundColor(color),
        SetAttribute(Attribute::Bold),
        Print(text),
        SetAttribute(Attribute::Reset),
        SetForegroundColor(Color::Reset),
        Print("\n")
    )?;
    out.flush()?;
    Ok(())
}

/// Read questions from `input` until `quit` or end of input, writing answers to `output`.
pub async fn interactive_mode<R: BufRead, W: Write>(
    app: &MediRag,
    mut input: R,
    mut output: W,
) -> Result<(), Box<dyn Error>> {
    let mut patient: Option<String> = None;

    loop {
        queue!(output, SetForegroundColor(Color::Green), Print(PROMPT), SetForegroundColor(Color::Reset))?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            break;
        }

        match parse_line(&line) {
            Line::Blank => continue,
            Line::Quit => break,
            Line::Check => match app.check().await {
                Ok(report) => {
                    let text = match report.analysis {
                        Some(analysis) => format!(
                            "{} nouveau(x) patient(s), index reconstruit.\n\n{}",
                            report.new_records, analysis
                        ),
                        None => format!("Aucun nouveau patient ({} au total).", report.total_records),
                    };
                    print_colored(&mut output, Color::Blue, &text)?;
                }
                Err(e) => print_colored(&mut output, Color::Red, &format!("Erreur: {e}"))?,
            },
            Line::Stats => {
                let stats = app.stats().await;
                print_colored(&mut output, Color::Blue, &serde_json::to_string_pretty(&stats)?)?;
            }
            Line::Scope(id) => {
                patient = id.map(str::to_string);
                let text = match patient.as_deref() {
                    Some(id) => format!("Questions limitées au patient {id}."),
                    None => "Questions sur tous les patients.".to_string(),
                };
                print_colored(&mut output, Color::DarkGrey, &text)?;
            }
            Line::Question(question) => {
                let request = ChatRequest {
                    question: question.to_string(),
                    patient_id: patient.clone(),
                };
                match app.answer(request).await {
                    Ok(response) => print_colored(&mut output, Color::Blue, &response.response)?,
                    Err(e) => print_colored(&mut output, Color::Red, &format!("Erreur: {e}"))?,
                }
            }
        }
    }

    Ok(())
}
