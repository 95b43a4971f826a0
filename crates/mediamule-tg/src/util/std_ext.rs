use easy_ext::ext;

pub(crate) mod prelude {
    pub(crate) use super::ErrorExt as _;
    pub(crate) use super::StrExt as _;
}

#[ext(ErrorExt)]
pub(crate) impl<E> E
where
    E: std::error::Error + ?Sized,
{
    fn display_chain(&self) -> display_error_chain::DisplayErrorChain<&Self> {
        display_error_chain::DisplayErrorChain::new(self)
    }
}

#[ext(StrExt)]
pub(crate) impl str {
    /// Returns the prefix of the string that contains at most `max_chars`
    /// characters. Never splits a multibyte character.
    fn truncate_chars(&self, max_chars: usize) -> &str {
        match self.char_indices().nth(max_chars) {
            Some((byte_idx, _)) => &self[..byte_idx],
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::StrExt;

    #[test]
    fn truncate_chars() {
        assert_eq!("kucing".truncate_chars(3), "kuc");
        assert_eq!("kucing".truncate_chars(30), "kucing");
        assert_eq!("ёжик".truncate_chars(2), "ёж");
        assert_eq!("".truncate_chars(0), "");
    }
}
