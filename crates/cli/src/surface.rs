//! Terminal rendering of the embedded merge view.
//!
//! Walks the differences chunk by chunk. For each one the user keeps the
//! original's lines or takes the conflict's, then chooses to save (keeping
//! or deleting the conflict) or discard.

use async_trait::async_trait;
use console::Style;
use dialoguer::{Confirm, Select};

use synconflict_core::conflict::{MergeChunk, MergeDecision, MergeSession, MergeSurface};
use synconflict_core::errors::MergeError;

use crate::style;

/// Interactive [`MergeSurface`] built on `dialoguer` prompts.
pub struct TerminalMergeSurface;

#[async_trait]
impl MergeSurface for TerminalMergeSurface {
    async fn present(&self, session: &mut MergeSession) -> Result<MergeDecision, MergeError> {
        println!();
        println!(
            "{}",
            style::header(&format!(
                "Merging {} into {}",
                session.conflict(),
                session.original()
            ))
        );

        review_chunks(session)?;
        choose_decision(session)
    }
}

fn review_chunks(session: &mut MergeSession) -> Result<(), MergeError> {
    // Taking a chunk removes it from the list, so only keeping advances.
    let mut index = 0;
    loop {
        let chunks = session.chunks();
        let Some(chunk) = chunks.get(index) else {
            break;
        };

        println!();
        println!(
            "{}",
            style::dim(&format!("Difference {} of {}", index + 1, chunks.len()))
        );
        print_chunk(chunk);

        let choice = Select::new()
            .with_prompt("Which version should the file keep?")
            .items(&["Keep mine", "Take from conflict", "Stop reviewing"])
            .default(0)
            .interact()
            .map_err(prompt_failed)?;

        match choice {
            0 => index += 1,
            1 => {
                session.revert_chunk(index);
            }
            _ => break,
        }
    }
    Ok(())
}

fn choose_decision(session: &MergeSession) -> Result<MergeDecision, MergeError> {
    if !session.is_modified() {
        println!("{}", style::dim("No changes taken from the conflict."));
    }

    loop {
        let choice = Select::new()
            .with_prompt("What now?")
            .items(&[
                "Save and delete conflict",
                "Save and keep conflict",
                "Discard",
            ])
            .default(0)
            .interact()
            .map_err(prompt_failed)?;

        match choice {
            0 => return Ok(MergeDecision::Save { delete_conflict: true }),
            1 => return Ok(MergeDecision::Save { delete_conflict: false }),
            _ => {
                let confirmed = Confirm::new()
                    .with_prompt("Discard all changes made in this merge?")
                    .default(false)
                    .interact()
                    .map_err(prompt_failed)?;
                if confirmed {
                    return Ok(MergeDecision::Discard);
                }
            }
        }
    }
}

fn print_chunk(chunk: &MergeChunk) {
    let removed = Style::new().red();
    let added = Style::new().green();
    for line in chunk.a_text.lines() {
        println!("{}", removed.apply_to(format!("- {}", line)));
    }
    for line in chunk.b_text.lines() {
        println!("{}", added.apply_to(format!("+ {}", line)));
    }
}

fn prompt_failed(err: dialoguer::Error) -> MergeError {
    MergeError::Surface(err.to_string())
}
