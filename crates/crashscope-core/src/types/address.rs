//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed address inside the analyzed image
///
/// Addresses are kernel virtual addresses as recorded in the dump. Keeping
/// them apart from plain `u64` values avoids mixing them up with sizes,
/// offsets and raw tag values, which all travel as integers too.
///
/// ## Example
///
/// ```rust
/// use crashscope_core::types::Address;
///
/// let link = Address::from(0xffff_8880_0000_1040);
/// let owner = link.checked_sub(0x40).unwrap();
/// assert_eq!(owner.value(), 0xffff_8880_0000_1000);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const NULL: Self = Address(0);

    /// Create a new address from a `u64` value (usable in const contexts)
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// `true` if this is the null address
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset, returning `None` on overflow
    ///
    /// ```rust
    /// use crashscope_core::types::Address;
    ///
    /// let addr = Address::from(0x1000);
    /// assert_eq!(addr.checked_add(0x100), Some(Address::from(0x1100)));
    /// assert_eq!(addr.checked_add(u64::MAX), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset, returning `None` on underflow
    ///
    /// Container-of arithmetic goes through this so that a garbage member
    /// pointer close to zero is reported instead of wrapping around.
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_null_address()
    {
        assert!(Address::NULL.is_null());
        assert!(!Address::new(1).is_null());
    }

    #[test]
    fn test_checked_sub_underflow()
    {
        assert_eq!(Address::new(0x10).checked_sub(0x20), None);
        assert_eq!(Address::new(0x30).checked_sub(0x20), Some(Address::new(0x10)));
    }

    #[test]
    fn test_lower_hex_matches_raw_value()
    {
        assert_eq!(format!("{:x}", Address::new(0xdead_beef)), "deadbeef");
        assert_eq!(Address::new(0x1000).to_string(), "0x0000000000001000");
    }
}
