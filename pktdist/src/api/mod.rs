pub mod rte;

pub type Errno = nix::errno::Errno;

/// Result type alias using nix's Errno for rte operations
pub type Result<T> = std::result::Result<T, Errno>;

/// Map a boolean precondition to `EINVAL`.
#[inline]
pub(crate) fn check_arg(ok: bool) -> Result<()> {
    if ok { Ok(()) } else { Err(Errno::EINVAL) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_arg() {
        assert_eq!(check_arg(true), Ok(()));
        assert_eq!(check_arg(false), Err(Errno::EINVAL));
    }
}
