// Kernel error handling and errno definitions.

/// Conditions the kernel itself detects while servicing a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    ProcessTableFull,
    DescriptorTableFull,
    BadDescriptor,
    PipeClosed,
    NoSuchProcess,
}

/// The narrow wire-level errno set this kernel's syscalls report.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Errno {
    ESRCH = 3,
    EBADF = 9,
    EAGAIN = 11,
    EINVAL = 22,
    EMFILE = 24,
    ENOSYS = 38,
}

impl From<KernelError> for Errno {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::ProcessTableFull => Errno::EAGAIN,
            KernelError::DescriptorTableFull => Errno::EMFILE,
            KernelError::BadDescriptor => Errno::EBADF,
            KernelError::PipeClosed => Errno::EAGAIN,
            KernelError::NoSuchProcess => Errno::ESRCH,
        }
    }
}

impl Errno {
    /// Negated, as the syscall ABI returns it in a register.
    pub fn as_i32(self) -> i32 {
        -(self as i32)
    }

    /// Mnemonic, for diagnostic log records.
    pub fn as_str(self) -> &'static str {
        match self {
            Errno::ESRCH => "ESRCH",
            Errno::EBADF => "EBADF",
            Errno::EAGAIN => "EAGAIN",
            Errno::EINVAL => "EINVAL",
            Errno::EMFILE => "EMFILE",
            Errno::ENOSYS => "ENOSYS",
        }
    }
}

pub type Result<T> = core::result::Result<T, KernelError>;
