//! Add or replace a user in a sessiongate credential file.
//!
//! Usage: sessiongate_passwd <users-file> <username> [role,role...]
//! The password is read from the first line of stdin.

use std::io::BufRead;

use anyhow::{anyhow, Context, Result};
use sessiongate::identity::FileCredentialStore;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 3 {
        return Err(anyhow!("usage: sessiongate_passwd <users-file> <username> [role,role...]"));
    }
    let roles: Vec<&str> = args
        .get(2)
        .map(|r| r.split(',').map(str::trim).filter(|r| !r.is_empty()).collect())
        .unwrap_or_default();

    let mut password = String::new();
    std::io::stdin().lock().read_line(&mut password).context("reading password from stdin")?;
    let password = password.trim_end_matches(['\r', '\n']);

    let store = FileCredentialStore::new(&args[0]);
    store.set_password(&args[1], password, &roles)?;
    println!("updated {} in {}", args[1], store.path().display());
    Ok(())
}
