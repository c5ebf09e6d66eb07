//! Mint a signed gateway token for manual testing.
//!
//! Usage: `gen-token <user_id> <username> [group,group,...] [ttl_minutes]`
//!
//! Reads `JWT_SECRET` from the environment (or `.env`), falling back to the
//! dev secret the gateway itself defaults to.

use swecc_sockets::auth::{sign_token, Claims};

fn main() {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("usage: gen-token <user_id> <username> [group,group,...] [ttl_minutes]");
        std::process::exit(2);
    }

    let user_id: u64 = args[0].parse().unwrap_or_else(|_| {
        eprintln!("user_id must be an integer");
        std::process::exit(2);
    });
    let username = args[1].clone();
    let groups: Vec<String> = args
        .get(2)
        .map(|raw| {
            raw.split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let ttl_minutes: i64 = args.get(3).and_then(|t| t.parse().ok()).unwrap_or(60);

    let secret = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "dev_secret_key_change_in_production".to_string());

    let claims = Claims::new(user_id, username, groups, ttl_minutes);
    match sign_token(&claims, &secret) {
        Ok(token) => println!("{token}"),
        Err(e) => {
            eprintln!("failed to sign token: {e}");
            std::process::exit(1);
        }
    }
}
