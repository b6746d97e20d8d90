//! Parser for configuration dumps.
//!
//! Two layouts are accepted, freely mixed:
//!
//! ```text
//! interfaces {
//!     ethernet eth0 {
//!         address 10.0.0.1/24
//!     }
//! }
//! set service ssh port 22
//! ```
//!
//! `set` is only a command at the top level. Inside a block it is an
//! ordinary token (`route-map RM rule 10 { set { ... } }`).

use crate::error::{ConfigError, ConfigResult};
use crate::lexer::{self, Token};
use crate::tree::ConfigTree;

pub(crate) fn parse(text: &str) -> ConfigResult<ConfigTree> {
    let mut tree = ConfigTree::new();
    // (node of the open block, line it was opened on)
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut words: Vec<String> = Vec::new();

    for spanned in lexer::tokenize(text)? {
        match spanned.token {
            Token::Word(w) => words.push(w),
            Token::Newline => flush_line(&mut tree, &stack, &mut words),
            Token::Open => {
                if words.is_empty() {
                    return Err(ConfigError::parse(spanned.line, "block has no name"));
                }
                let parent = current_block(&stack);
                let id = tree.insert_under(parent, &words);
                words.clear();
                stack.push((id, spanned.line));
            }
            Token::Close => {
                flush_line(&mut tree, &stack, &mut words);
                if stack.pop().is_none() {
                    return Err(ConfigError::parse(spanned.line, "unexpected '}'"));
                }
            }
        }
    }

    flush_line(&mut tree, &stack, &mut words);

    if let Some(&(_, line)) = stack.last() {
        return Err(ConfigError::parse(line, "block is never closed"));
    }

    Ok(tree)
}

fn current_block(stack: &[(usize, usize)]) -> usize {
    stack
        .last()
        .map(|&(id, _)| id)
        .unwrap_or_else(ConfigTree::root_id)
}

fn flush_line(tree: &mut ConfigTree, stack: &[(usize, usize)], words: &mut Vec<String>) {
    if words.is_empty() {
        return;
    }
    let tokens: &[String] = if stack.is_empty() && words[0] == "set" {
        &words[1..]
    } else {
        &words[..]
    };
    if !tokens.is_empty() {
        tree.insert_under(current_block(stack), tokens);
    }
    words.clear();
}
