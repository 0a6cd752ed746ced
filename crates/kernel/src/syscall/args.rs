//! Decoding of system call arguments.

use mm::AddressSpace;

use super::SyscallError;
use crate::param::MAX_SYSCALL_ARGS;

/// The raw argument words of one system call, in call order.
///
/// The trap handler copies these from the caller's frame. Nothing here trusts them:
/// every accessor checks the index, and [`SyscallArgs::pointer`] checks the range
/// against the caller's memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyscallArgs {
    words: [u32; MAX_SYSCALL_ARGS],
    len: usize,
}

impl SyscallArgs {
    /// Collects up to [`MAX_SYSCALL_ARGS`] words; extra words are ignored.
    pub fn new(words: &[u32]) -> Self {
        let len = words.len().min(MAX_SYSCALL_ARGS);
        let mut args = [0; MAX_SYSCALL_ARGS];
        args[..len].copy_from_slice(&words[..len]);
        Self { words: args, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn word(&self, n: usize) -> Result<u32, SyscallError> {
        self.words[..self.len]
            .get(n)
            .copied()
            .ok_or(SyscallError::BadArgument)
    }

    /// Returns argument `n` as a signed integer.
    pub fn int(&self, n: usize) -> Result<i32, SyscallError> {
        self.word(n).map(|word| word as i32)
    }

    /// Returns argument `n` as a user address of a `size`-byte object.
    ///
    /// Fails unless the whole object lies inside `space`.
    pub fn pointer(
        &self,
        n: usize,
        size: usize,
        space: &AddressSpace,
    ) -> Result<usize, SyscallError> {
        let address = self.word(n)? as usize;
        let in_bounds = address < space.size()
            && address
                .checked_add(size)
                .is_some_and(|end| end <= space.size());
        if !in_bounds {
            return Err(SyscallError::BadAddress);
        }
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mm::{AddressTranslator, PAGE_SIZE};

    fn setup() {
        if AddressTranslator::try_current().is_none() {
            AddressTranslator::set_current(AddressTranslator::emulated(64 * PAGE_SIZE));
        }
    }

    #[test]
    fn ints_are_signed() {
        let args = SyscallArgs::new(&[7, u32::MAX]);
        assert_eq!(args.len(), 2);
        assert_eq!(args.int(0), Ok(7));
        assert_eq!(args.int(1), Ok(-1));
    }

    #[test]
    fn missing_argument() {
        let args = SyscallArgs::new(&[1]);
        assert_eq!(args.int(1), Err(SyscallError::BadArgument));
        assert_eq!(args.int(MAX_SYSCALL_ARGS), Err(SyscallError::BadArgument));
        assert!(SyscallArgs::new(&[]).is_empty());
    }

    #[test]
    fn extra_words_are_dropped() {
        let args = SyscallArgs::new(&[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(args.len(), MAX_SYSCALL_ARGS);
        assert_eq!(args.int(5), Ok(6));
    }

    #[test]
    fn pointer_must_fit_in_memory() {
        setup();
        let mut space = AddressSpace::new().unwrap();
        space.grow(2 * PAGE_SIZE as isize).unwrap();

        let size = 2 * PAGE_SIZE as u32;
        let args = SyscallArgs::new(&[PAGE_SIZE as u32, size - 4, size - 2, size, u32::MAX]);
        assert_eq!(args.pointer(0, 4, &space), Ok(PAGE_SIZE));
        assert_eq!(args.pointer(1, 4, &space), Ok(2 * PAGE_SIZE - 4));
        assert_eq!(args.pointer(2, 4, &space), Err(SyscallError::BadAddress));
        assert_eq!(args.pointer(3, 0, &space), Err(SyscallError::BadAddress));
        assert_eq!(args.pointer(4, 4, &space), Err(SyscallError::BadAddress));
    }
}
