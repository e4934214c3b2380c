use chrono::Utc;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Logical location of an upload: a base category plus the slug hashed for fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMeta {
    pub base: String,
    pub slug: String,
}

impl UploadMeta {
    /// Badge artwork lives under `badge/`.
    pub fn badge(slug: &str) -> Self {
        Self {
            base: "badge".to_string(),
            slug: slug.to_string(),
        }
    }

    /// Award artwork lives under `award/<u0>/<u1>/<username>/`.
    ///
    /// Each segment is reduced to `[A-Za-z0-9_.@+-]` and never resolves to
    /// `.` or `..`, so a username cannot leave the `award/` tree.
    pub fn award(username: &str, badge_slug: &str) -> Self {
        let mut chars = username.chars();
        let first = path_segment(&chars.next().map(String::from).unwrap_or_default());
        let second = path_segment(&chars.next().map(String::from).unwrap_or_default());
        Self {
            base: format!("award/{first}/{second}/{}", path_segment(username)),
            slug: badge_slug.to_string(),
        }
    }
}

fn path_segment(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '@' | '+' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Builds sharded upload paths of the form
/// `base/h1/h2/hash_field_timestamp_rand.ext`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadPathBuilder;

impl UploadPathBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Builds a path using the current time and a random suffix.
    pub fn build(&self, meta: &UploadMeta, field: &str, ext: &str) -> String {
        let now = Utc::now().timestamp();
        let rand = rand::thread_rng().gen_range(0..1000);
        self.compose(meta, field, ext, now, rand)
    }

    /// Deterministic variant of [`build`](Self::build).
    pub fn compose(&self, meta: &UploadMeta, field: &str, ext: &str, now: i64, rand: u32) -> String {
        let hash = hex::encode(Sha256::digest(meta.slug.as_bytes()));
        let h1 = &hash[0..1];
        let h2 = &hash[1..2];
        format!(
            "{base}/{h1}/{h2}/{hash}_{field}_{now}_{rand:04}.{ext}",
            base = meta.base
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_sharded_path() {
        let meta = UploadMeta::badge("team-player");
        let path = UploadPathBuilder::new().compose(&meta, "image", "png", 1_700_000_000, 7);

        assert_eq!(
            path,
            "badge/6/3/6303f07aa5e6a8b79d852fc0325de88e3876aeb8b1b17675629e6c8ba2de1869_image_1700000000_0007.png"
        );
    }

    #[test]
    fn same_slug_shares_directory() {
        let builder = UploadPathBuilder::new();
        let meta = UploadMeta::badge("mentor");
        let a = builder.compose(&meta, "image", "png", 1, 1);
        let b = builder.compose(&meta, "image", "png", 2, 999);
        let dir = |p: &str| p.rsplit_once('/').map(|(dir, _)| dir.to_string());
        assert_eq!(dir(&a), dir(&b));
        assert!(b.ends_with("_2_0999.png"));
    }

    #[test]
    fn award_meta_uses_username_prefix() {
        let meta = UploadMeta::award("alice", "mentor");
        assert_eq!(meta.base, "award/a/l/alice");
        assert_eq!(meta.slug, "mentor");

        let short = UploadMeta::award("z", "mentor");
        assert_eq!(short.base, "award/z/_/z");
    }

    #[test]
    fn award_meta_neutralises_path_syntax_in_username() {
        let escaping = UploadMeta::award("../../../../escape", "mentor");
        assert_eq!(escaping.base, "award/_/_/.._.._.._.._escape");

        let dots = UploadMeta::award("..", "mentor");
        assert_eq!(dots.base, "award/_/_/_");

        let mail = UploadMeta::award("ana+b@example.org", "mentor");
        assert_eq!(mail.base, "award/a/n/ana+b@example.org");

        for meta in [escaping, dots, mail] {
            assert!(meta.base.split('/').all(|part| part != ".." && part != "."));
        }
    }

    #[test]
    fn build_stays_within_random_range() {
        let builder = UploadPathBuilder::new();
        let meta = UploadMeta::badge("mentor");
        for _ in 0..50 {
            let path = builder.build(&meta, "image", "png");
            let stem = path.trim_end_matches(".png");
            let rand = stem.rsplit('_').next().expect("rand suffix");
            assert_eq!(rand.len(), 4);
            assert!(rand.parse::<u32>().expect("numeric") < 1000);
        }
    }
}
