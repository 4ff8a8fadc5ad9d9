//! Convenience macros for KNX addresses.
//!
//! Both macros check their components at compile time and expand to a
//! constant raw value, so they never fail at runtime.

/// Creates a [`GroupAddress`](crate::addressing::GroupAddress) from 3-level notation.
///
/// # Syntax
///
/// ```text
/// ga!(main/middle/sub)
/// ```
///
/// Where:
/// - `main`: Main group (0-31)
/// - `middle`: Middle group (0-7)
/// - `sub`: Sub group (0-255)
///
/// # Examples
///
/// ```
/// use knx_tunnel::ga;
/// use knx_tunnel::GroupAddress;
///
/// let light = ga!(1 / 2 / 3);
/// assert_eq!(light, GroupAddress::new(1, 2, 3).unwrap());
/// assert_eq!(light.raw(), 0x0A03);
/// ```
///
/// # Compile-Time Validation
///
/// ```compile_fail
/// // main group > 31
/// let addr = knx_tunnel::ga!(32 / 0 / 0);
/// ```
///
/// ```compile_fail
/// // middle group > 7
/// let addr = knx_tunnel::ga!(1 / 8 / 0);
/// ```
#[macro_export]
macro_rules! ga {
    ($main:literal / $middle:literal / $sub:literal) => {{
        const _: () = {
            if $main > 31 {
                panic!("Main group must be 0-31");
            }
            if $middle > 7 {
                panic!("Middle group must be 0-7");
            }
            if $sub > 255 {
                panic!("Sub group must be 0-255");
            }
        };

        // MMMMM III SSSSSSSS (5 bits main, 3 bits middle, 8 bits sub)
        const RAW: u16 = (($main & 0x1F) << 11) | (($middle & 0x07) << 8) | ($sub & 0xFF);
        $crate::addressing::GroupAddress::from(RAW)
    }};
}

/// Creates an [`IndividualAddress`](crate::addressing::IndividualAddress)
/// from area, line and device.
///
/// # Examples
///
/// ```
/// use knx_tunnel::ia;
///
/// let device = ia!(1, 1, 5);
/// assert_eq!(device.to_string(), "1.1.5");
/// ```
///
/// ```compile_fail
/// // line > 15
/// let addr = knx_tunnel::ia!(1, 16, 0);
/// ```
#[macro_export]
macro_rules! ia {
    ($area:literal, $line:literal, $device:literal) => {{
        const _: () = {
            if $area > 15 {
                panic!("Area must be 0-15");
            }
            if $line > 15 {
                panic!("Line must be 0-15");
            }
            if $device > 255 {
                panic!("Device must be 0-255");
            }
        };

        const RAW: u16 = (($area & 0x0F) << 12) | (($line & 0x0F) << 8) | ($device & 0xFF);
        $crate::addressing::IndividualAddress::from(RAW)
    }};
}
