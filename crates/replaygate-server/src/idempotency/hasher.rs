//! Bounded-prefix request body hashing.
//!
//! Only the first `budget` bytes of a body take part in the digest. Two bodies
//! that share their first `budget` bytes therefore produce the same key even
//! if they differ afterwards. The full body is still forwarded downstream.

use axum::body::Body;
use bytes::{Bytes, BytesMut};
use futures_util::{StreamExt, stream};
use sha2::{Digest, Sha256};

/// Result of hashing a request body prefix.
pub struct HashedBody {
    /// Lowercase hex SHA-256 of the hashed prefix.
    pub digest: String,
    /// Number of bytes that went into the digest.
    pub hashed_len: usize,
    /// Replay body: the bytes already read followed by whatever was left unread.
    pub body: Body,
}

/// Reads at most `budget` bytes of `body` and hashes exactly those bytes.
///
/// Frames are consumed whole, so the buffered prefix may slightly exceed the
/// budget; the overshoot is forwarded but not hashed.
pub async fn hash_body_prefix(body: Body, budget: usize) -> Result<HashedBody, axum::Error> {
    let mut stream = body.into_data_stream();
    let mut hasher = Sha256::new();
    let mut consumed: Vec<Bytes> = Vec::new();
    let mut hashed_len = 0usize;
    let mut exhausted = false;

    while hashed_len < budget {
        match stream.next().await {
            Some(chunk) => {
                let chunk = chunk?;
                let take = chunk.len().min(budget - hashed_len);
                hasher.update(&chunk[..take]);
                hashed_len += take;
                consumed.push(chunk);
            }
            None => {
                exhausted = true;
                break;
            }
        }
    }

    let digest = hex::encode(hasher.finalize());
    let body = if exhausted {
        Body::from(concat(consumed))
    } else {
        let prefix = stream::iter(consumed.into_iter().map(Ok::<_, axum::Error>));
        Body::from_stream(prefix.chain(stream))
    };

    Ok(HashedBody {
        digest,
        hashed_len,
        body,
    })
}

fn concat(chunks: Vec<Bytes>) -> Bytes {
    match chunks.len() {
        0 => Bytes::new(),
        1 => chunks.into_iter().next().unwrap_or_default(),
        _ => {
            let total = chunks.iter().map(Bytes::len).sum();
            let mut buf = BytesMut::with_capacity(total);
            for chunk in chunks {
                buf.extend_from_slice(&chunk);
            }
            buf.freeze()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunked(parts: &[&'static str]) -> Body {
        let chunks: Vec<Result<Bytes, std::io::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        Body::from_stream(stream::iter(chunks))
    }

    async fn collect(body: Body) -> Bytes {
        axum::body::to_bytes(body, usize::MAX).await.unwrap()
    }

    #[tokio::test]
    async fn hashes_whole_body_under_budget() {
        let hashed = hash_body_prefix(Body::from(r#"{"title":"x"}"#), 1024)
            .await
            .unwrap();

        let expected = hex::encode(Sha256::digest(br#"{"title":"x"}"#));
        assert_eq!(hashed.digest, expected);
        assert_eq!(hashed.hashed_len, 13);
        assert_eq!(collect(hashed.body).await, &br#"{"title":"x"}"#[..]);
    }

    #[tokio::test]
    async fn empty_body_hashes_to_empty_digest() {
        let hashed = hash_body_prefix(Body::empty(), 1024).await.unwrap();
        assert_eq!(hashed.digest, hex::encode(Sha256::digest(b"")));
        assert!(collect(hashed.body).await.is_empty());
    }

    #[tokio::test]
    async fn bytes_past_budget_are_ignored_but_forwarded() {
        let a = hash_body_prefix(chunked(&["abcd", "efgh", "XXXX"]), 6)
            .await
            .unwrap();
        let b = hash_body_prefix(chunked(&["abcdef", "ghYYYY"]), 6)
            .await
            .unwrap();

        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest, hex::encode(Sha256::digest(b"abcdef")));
        assert_eq!(a.hashed_len, 6);
        assert_eq!(collect(a.body).await, &b"abcdefghXXXX"[..]);
        assert_eq!(collect(b.body).await, &b"abcdefghYYYY"[..]);
    }

    #[tokio::test]
    async fn differing_prefix_changes_digest() {
        let a = hash_body_prefix(Body::from("{\"title\":\"x\"}"), 512 * 1024)
            .await
            .unwrap();
        let b = hash_body_prefix(Body::from("{\"title\":\"y\"}"), 512 * 1024)
            .await
            .unwrap();
        assert_ne!(a.digest, b.digest);
    }
}
