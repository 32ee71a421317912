//! Generate access tokens for manual testing against a running gateway.
//!
//! Run with: cargo run --package protocol --example token_vectors -- <secret> [path...]

use protocol::{
    unix_now, AccessTokenCodec, AccessTokenPayload, CipherAlgorithm, NormalizedPath, TokenCipher,
};
use serde_json::Map;

fn main() {
    let mut args = std::env::args().skip(1);
    let secret = args
        .next()
        .unwrap_or_else(|| "s3cr3t-passphrase-value".to_string());
    let mut paths: Vec<String> = args.collect();
    if paths.is_empty() {
        paths.push("docs/report.pdf".to_string());
    }

    let cipher = TokenCipher::from_passphrase(&secret, None, "fsgate", CipherAlgorithm::default())
        .expect("invalid secret");
    let codec = AccessTokenCodec::new(cipher);
    let now = unix_now();

    for path in &paths {
        let path = NormalizedPath::new(path);
        print_vector("public", &codec, AccessTokenPayload::public(path.clone(), Map::new()));
        print_vector(
            "valid_1h",
            &codec,
            AccessTokenPayload::temporary(path.clone(), now + 3600, Map::new()),
        );
        print_vector(
            "expired",
            &codec,
            AccessTokenPayload::temporary(path, now.saturating_sub(1), Map::new()),
        );
    }
}

fn print_vector(name: &str, codec: &AccessTokenCodec, payload: AccessTokenPayload) {
    let token = codec.encode(&payload).expect("encoding failed");
    println!("# {} {} expires={}", name, payload.path, payload.expires);
    println!("{}", token);
}
