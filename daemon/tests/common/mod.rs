// Helpers for the interactive hardware tests: prompts and console output.
#![allow(dead_code)]

use std::io::{self, Write};

/// Ask user to confirm an action
pub fn confirm_action(prompt: &str) -> bool {
    print!(
        "\n[CONFIRM] {}\nPress 'y' to confirm, any other key to skip: ",
        prompt
    );
    io::stdout().flush().unwrap();

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    input.trim().eq_ignore_ascii_case("y")
}

pub fn print_header(title: &str) {
    println!("\n{}", "=".repeat(60));
    println!("  {}", title);
    println!("{}", "=".repeat(60));
}

pub fn print_success(message: &str) {
    println!("\n✓ {}", message);
}

pub fn print_error(message: &str) {
    println!("\n✗ {}", message);
}

pub fn print_info(message: &str) {
    println!("\nℹ {}", message);
}
