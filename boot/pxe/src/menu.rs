//! # Boot Menu
//!
//! Turns the parsed menu file into a numbered list of choices and asks the
//! user. The first screen is a short countdown prompt; F8 opens the full
//! menu, anything else keeps the server's default.

use crate::bms::{truncate_to, BmsClient};
use crate::config::parse_decimal;
use crate::menufile::{parse_menu, EntryType, MenuEntry};
use crate::retry::{load_with_retry, RetryPolicy};
use crate::{Platform, Result, APP_NAME, VERSION};
use alloc::string::String;
use alloc::vec::Vec;
use netchain_hal::Key;

/// Prompt countdown when the menu has no timeout entry
pub const DEFAULT_TIMEOUT_SECS: u32 = 5;

/// Maximum length of the server display name
pub const MAX_SERVER_NAME_LENGTH: usize = 128;

/// Key that opens the menu from the prompt
pub const MENU_KEY: Key = Key::Function(8);

/// The user's pick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    /// Chosen entry
    pub entry: MenuEntry,
    /// Choice number, starting at 1
    pub choice: usize,
    /// The choice is the server's default
    pub default_chosen: bool,
}

/// A boot menu offered by one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    entries: Vec<MenuEntry>,
    /// Entry index of each choice
    choices: Vec<usize>,
    default_choice: Option<usize>,
    timeout_secs: u32,
    server_name: String,
}

impl Menu {
    /// Build the menu model
    ///
    /// `default_name` is shown when the menu has no server name entry.
    pub fn from_entries(entries: Vec<MenuEntry>, default_name: &str) -> Self {
        let mut choices = Vec::new();
        let mut default_choice = None;
        let mut timeout_secs = DEFAULT_TIMEOUT_SECS;
        let mut server_name = String::from(default_name);

        for (index, entry) in entries.iter().enumerate() {
            match entry.entry_type {
                EntryType::Timeout => timeout_secs = parse_decimal(&entry.command),
                EntryType::ServerName => {
                    server_name = entry.command.clone();
                    truncate_to(&mut server_name, MAX_SERVER_NAME_LENGTH);
                }
                ty if ty.is_selectable() => {
                    choices.push(index);
                    if default_choice.is_none() && entry.is_default() {
                        default_choice = Some(choices.len());
                    }
                }
                _ => {}
            }
        }

        Self { entries, choices, default_choice, timeout_secs, server_name }
    }

    /// All entries in file order
    pub fn entries(&self) -> &[MenuEntry] {
        &self.entries
    }

    /// Number of choices
    pub fn choice_count(&self) -> usize {
        self.choices.len()
    }

    /// Nothing to choose: the server does not serve this client
    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }

    /// Entry behind a choice number
    pub fn entry_for_choice(&self, choice: usize) -> Option<&MenuEntry> {
        let index = *self.choices.get(choice.checked_sub(1)?)?;
        self.entries.get(index)
    }

    /// Default choice number
    pub fn default_choice(&self) -> Option<usize> {
        self.default_choice
    }

    /// Prompt countdown in seconds; 0 waits for a key
    pub fn timeout_secs(&self) -> u32 {
        self.timeout_secs
    }

    /// Server display name
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn selection(&self, choice: usize) -> Option<Selection> {
        let entry = self.entry_for_choice(choice)?.clone();
        Some(Selection { entry, choice, default_chosen: self.default_choice == Some(choice) })
    }

    // =========================================================================
    // Screens
    // =========================================================================

    fn header(platform: &Platform<'_>) {
        let console = platform.console;
        console.set_cursor(0, 0);
        console.set_highlight(true);
        platform.print(format_args!("\n {} \n", APP_NAME));
        console.set_highlight(false);
        platform.print(format_args!(" Version {}\n\n", VERSION));
    }

    /// Countdown prompt; `true` when the user asked for the menu
    pub fn prompt(&self, platform: &Platform<'_>) -> bool {
        let console = platform.console;
        console.clear();
        Self::header(platform);

        platform.print(format_args!(" PXE BootClient [Server: {}] ", self.server_name));
        let (column, row) = console.cursor();

        let mut remaining = self.timeout_secs;
        let key = loop {
            console.set_cursor(column, row);
            platform.print(format_args!("({}) ", remaining));

            let wait = if self.timeout_secs == 0 { 0 } else { 1000 };
            if let Some(key) = console.read_key(wait) {
                break Some(key);
            }
            remaining = remaining.saturating_sub(1);
            if remaining == 0 {
                break None;
            }
        };

        console.set_cursor(column, row);
        platform.print(format_args!("     "));
        key == Some(MENU_KEY)
    }

    fn draw(&self, platform: &Platform<'_>, highlight: usize) {
        let console = platform.console;
        Self::header(platform);

        let mut number = 0;
        for (index, entry) in self.entries.iter().enumerate() {
            let selectable = entry.entry_type.is_selectable();
            if selectable {
                number += 1;
                console.set_highlight(number == highlight);
                platform.print(format_args!(" {:2}: {} \n", number, entry.text));
                console.set_highlight(false);
            } else if entry.entry_type == EntryType::Text {
                platform.print(format_args!("{}\n", entry.text));
            } else {
                log::trace!("menu entry {} not shown", index);
            }
        }
    }

    /// Full menu; returns the chosen choice number
    pub fn interactive(&self, platform: &Platform<'_>) -> usize {
        let count = self.choice_count();
        let mut highlight = self.default_choice.unwrap_or(1);
        platform.console.clear();

        let choice = loop {
            self.draw(platform, highlight);

            match platform.console.read_key(0) {
                Some(Key::Enter) => break highlight,
                Some(Key::Up) => highlight = if highlight <= 1 { count } else { highlight - 1 },
                Some(Key::Down) => highlight = if highlight >= count { 1 } else { highlight + 1 },
                Some(key) => match key.as_digit() {
                    Some(digit) if (1..=count).contains(&(digit as usize)) => break digit as usize,
                    _ => {}
                },
                None => {}
            }
        };

        platform.print(format_args!("\n"));
        choice
    }

    /// Ask the user
    ///
    /// `None` when the menu has no choices, or when the prompt expired and
    /// the server named no default.
    pub fn select(&self, platform: &Platform<'_>) -> Option<Selection> {
        if self.is_empty() {
            return None;
        }
        if self.prompt(platform) {
            let choice = self.interactive(platform);
            self.selection(choice)
        } else {
            self.selection(self.default_choice?)
        }
    }
}

/// Fetch and parse the menu of one server
pub fn load_menu(
    platform: &Platform<'_>,
    client: &BmsClient<'_>,
    arch: u16,
    policy: RetryPolicy,
    default_name: &str,
) -> Result<Menu> {
    platform.print(format_args!("Trying to load menu file\n"));
    let data = load_with_retry(platform, client, arch, policy)?;
    let entries = parse_menu(&data);
    platform.debug_delay(5);

    let menu = Menu::from_entries(entries?, default_name);
    if menu.is_empty() {
        platform.print(format_args!("{} doesn't care about us.\n", menu.server_name()));
    }
    Ok(menu)
}
