use anyhow::{Context, Result};
use dialoguer::{Input, Select};

const PREVIOUS_PAGE: &str = "« Previous page";
const NEXT_PAGE: &str = "Next page »";

pub trait Prompter {
    fn select(&mut self, prompt: &str, items: &[String]) -> Result<usize>;
    fn input_with_default(&mut self, prompt: &str, default: &str) -> Result<String>;
}

pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn select(&mut self, prompt: &str, items: &[String]) -> Result<usize> {
        Select::new()
            .with_prompt(prompt)
            .items(items)
            .default(0)
            .interact()
            .with_context(|| format!("prompt '{prompt}' was aborted"))
    }

    fn input_with_default(&mut self, prompt: &str, default: &str) -> Result<String> {
        Input::<String>::new()
            .with_prompt(prompt)
            .default(default.to_string())
            .allow_empty(true)
            .interact_text()
            .with_context(|| format!("prompt '{prompt}' was aborted"))
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Selection {
    Item(usize),
    Page(u32),
}

pub fn choose_or_navigate<P>(
    prompter: &mut P,
    prompt: &str,
    items: &[String],
    current_page: u32,
    total_pages: u32,
) -> Result<Selection>
where
    P: Prompter + ?Sized,
{
    let mut entries = items.to_vec();
    let mut navigation = Vec::new();
    if total_pages > 1 {
        if current_page > 1 {
            entries.push(PREVIOUS_PAGE.to_string());
            navigation.push(current_page - 1);
        }
        if current_page < total_pages {
            entries.push(NEXT_PAGE.to_string());
            navigation.push(current_page + 1);
        }
    }

    let label = if total_pages > 1 {
        format!("{prompt} (page {current_page}/{total_pages})")
    } else {
        prompt.to_string()
    };

    let index = prompter.select(&label, &entries)?;
    if index < items.len() {
        return Ok(Selection::Item(index));
    }

    navigation
        .get(index - items.len())
        .copied()
        .map(Selection::Page)
        .with_context(|| format!("selection {index} is out of range"))
}
