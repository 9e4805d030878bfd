//! Remote hosts.
//!
//! One SSH connection is created for one `Host`. The host keeps its position
//! in the config's `remote` list no matter which wave it ends up in.

use std::fmt;

use colored::*;
use colourado::{Color, ColorPalette, PaletteType};
use itertools::zip;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Zero-based position in the original host list. Only used to fill in
    /// `{index}` placeholders.
    pub index: usize,
    /// Address to connect to.
    pub address: String,
}

impl Host {
    pub fn new(index: usize, address: impl Into<String>) -> Self {
        Self {
            index,
            address: address.into(),
        }
    }

    /// For pretty-printing the host name.
    /// Surrounds with brackets and colors it with the given color.
    pub fn prettify(&self, color: &Color) -> ColoredString {
        let r = (color.red * 255.0) as u8;
        let g = (color.green * 255.0) as u8;
        let b = (color.blue * 255.0) as u8;
        format!("{}", self).truecolor(r, g, b)
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self.address)
    }
}

/// Pairs every address with its global index and a distinct display color.
pub fn hosts_with_colors(addresses: &[String]) -> Vec<(Host, Color)> {
    if addresses.is_empty() {
        return Vec::new();
    }
    let colors = ColorPalette::new(addresses.len() as u32, PaletteType::Pastel, false).colors;
    zip(addresses.iter().enumerate(), colors)
        .map(|((index, address), color)| (Host::new(index, address.clone()), color))
        .collect()
}
