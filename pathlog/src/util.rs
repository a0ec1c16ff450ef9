/// Positioned diagnostics in the style of the classic err(3) family.
/// Warnings go straight to stderr; errors are values that propagate to
/// main, which prints them and exits.

/// Report a non-fatal condition on stderr, tagged with the source
/// position.
#[macro_export]
macro_rules! warnx {
    ($($arg:tt)*) => {
        eprintln!("warning at {}:{}: {}", file!(), line!(), format_args!($($arg)*))
    };
}

/// Bail out of the enclosing function with an error message tagged
/// with the source position.
#[macro_export]
macro_rules! errx {
    ($($arg:tt)*) => {
        anyhow::bail!("error at {}:{}: {}", file!(), line!(), format_args!($($arg)*))
    };
}
