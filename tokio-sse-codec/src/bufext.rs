use bytes::{Buf, BytesMut};

// We only support UTF-8 in this house
pub(crate) const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

pub(crate) trait BufExt: Buf {
    fn bump_if(&mut self, byte: u8);
    fn find_line_end(&self, from: usize) -> Option<usize>;
    fn is_partial_bom(&self) -> bool;
    fn strip_utf8_bom(&mut self) -> bool;
}

impl BufExt for BytesMut {
    /// Advances past the first byte if it is equal to `byte`
    #[inline]
    fn bump_if(&mut self, byte: u8) {
        if self.first() == Some(&byte) {
            self.advance(1);
        }
    }

    /// Position of the first `\r` or `\n` at or after `from`
    #[inline]
    fn find_line_end(&self, from: usize) -> Option<usize> {
        self.get(from..)?
            .iter()
            .position(|b| *b == b'\n' || *b == b'\r')
            .map(|offset| from + offset)
    }

    /// True when the buffer could still turn into a BOM with more data
    #[inline]
    fn is_partial_bom(&self) -> bool {
        self.len() < UTF8_BOM.len() && UTF8_BOM.starts_with(self.as_ref())
    }

    /// Advances the buffer cursor past the UTF-8 BOM if it exists
    #[inline]
    fn strip_utf8_bom(&mut self) -> bool {
        if self.starts_with(UTF8_BOM) {
            self.advance(UTF8_BOM.len());
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::BufExt;
    use bytes::BytesMut;

    #[test]
    fn bump_if() {
        let mut bytes = BytesMut::from(&b" value"[..]);
        bytes.bump_if(b' ');
        assert_eq!(bytes.as_ref(), b"value");
        bytes.bump_if(b' ');
        assert_eq!(bytes.as_ref(), b"value");
    }

    #[test]
    fn find_line_end() {
        let bytes = BytesMut::from(&b"data: a\r\ndata: b\n"[..]);
        assert_eq!(bytes.find_line_end(0), Some(7));
        assert_eq!(bytes.find_line_end(9), Some(16));
        assert_eq!(bytes.find_line_end(17), None);
        assert_eq!(bytes.find_line_end(100), None);
    }

    #[test]
    fn partial_bom() {
        assert!(BytesMut::from(&[0xEFu8][..]).is_partial_bom());
        assert!(BytesMut::from(&[0xEFu8, 0xBB][..]).is_partial_bom());
        assert!(!BytesMut::from(&b"ev"[..]).is_partial_bom());
    }

    #[test]
    fn strip_utf8_bom() {
        let mut bytes = BytesMut::from(&b"\xEF\xBB\xBFHello, world!"[..]);
        assert!(bytes.strip_utf8_bom());
        assert_eq!(bytes.as_ref(), b"Hello, world!");
        assert!(!bytes.strip_utf8_bom());
    }
}
