//! Opaque pagination cursors encoding `(next_try_ms, id)` tuples.
//!
//! Grounded on `jobqueue/mysql/inspector.go`'s `decodeCursor`: a cursor
//! is a base64-encoded `"next_try,id"` pair. Listings fetch `limit + 1`
//! rows to detect whether a next page exists; the `(next_try, id)` of
//! the last *returned* row seeds the next page's cursor.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub next_try: i64,
    pub id: i64,
}

impl Cursor {
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{},{}", self.next_try, self.id))
    }

    pub fn decode(s: &str) -> Option<Cursor> {
        let raw = URL_SAFE_NO_PAD.decode(s).ok()?;
        let raw = String::from_utf8(raw).ok()?;
        let (next_try, id) = raw.split_once(',')?;
        Some(Cursor {
            next_try: next_try.parse().ok()?,
            id: id.parse().ok()?,
        })
    }
}

/// Direction a listing is ordered in. "Recent" views order
/// `next_try DESC, id DESC`; "created-order" views order the reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Given rows fetched with `limit + 1`, split off the boundary row and
/// compute the next cursor. Returns `(page, next_cursor)`.
pub fn paginate<T: Clone>(mut rows: Vec<T>, limit: usize, cursor_of: impl Fn(&T) -> Cursor) -> (Vec<T>, Option<String>) {
    if rows.len() > limit {
        rows.truncate(limit);
        let next = rows.last().map(|r| cursor_of(r).encode());
        (rows, next)
    } else {
        (rows, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let c = Cursor {
            next_try: 1_700_000_000_000,
            id: 42,
        };
        let encoded = c.encode();
        assert_eq!(Cursor::decode(&encoded), Some(c));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(Cursor::decode("not-valid-base64!!"), None);
    }

    #[test]
    fn paginate_detects_boundary() {
        let rows = vec![
            Cursor { next_try: 1, id: 1 },
            Cursor { next_try: 2, id: 2 },
            Cursor { next_try: 3, id: 3 },
        ];
        let (page, next) = paginate(rows, 2, |c| *c);
        assert_eq!(page.len(), 2);
        assert_eq!(next, Some(Cursor { next_try: 2, id: 2 }.encode()));
    }

    #[test]
    fn paginate_no_boundary_when_exact() {
        let rows = vec![Cursor { next_try: 1, id: 1 }];
        let (page, next) = paginate(rows, 5, |c| *c);
        assert_eq!(page.len(), 1);
        assert_eq!(next, None);
    }
}
