use geozero::ToGeo;
use geozero::wkb::Wkb;
use md5::{Digest, Md5};

use crate::error::Result;

/// SRID applied to every stored geometry.
pub const SRID: i32 = 4269;

/// Canonical WKB for `POLYGON EMPTY` (little-endian, zero rings). All
/// missing shapes normalize to these bytes so they collapse to one bin.
pub const EMPTY_POLYGON_WKB: [u8; 9] = [0x01, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];

/// Canonical WKB for `POINT EMPTY` (little-endian, NaN coordinates).
pub const EMPTY_POINT_WKB: [u8; 21] = [
    0x01, 0x01, 0x00, 0x00, 0x00, // little-endian point
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf8, 0x7f, // x = NaN
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf8, 0x7f, // y = NaN
];

/// MD5 digest over WKB bytes; the content address of a shape.
pub fn geometry_hash(wkb: &[u8]) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(wkb);
    hasher.finalize().to_vec()
}

pub fn empty_polygon_hash() -> Vec<u8> {
    geometry_hash(&EMPTY_POLYGON_WKB)
}

fn decode(wkb: &[u8], what: &str) -> Result<()> {
    if wkb == EMPTY_POLYGON_WKB || wkb == EMPTY_POINT_WKB {
        return Ok(());
    }
    let _geom: geo_types::Geometry<f64> = Wkb(wkb.to_vec()).to_geo().map_err(|err| {
        crate::error::Error::BulkCreate {
            message: format!("failed to decode {} WKB: {}", what, err),
            paths: Vec::new(),
        }
    })?;
    Ok(())
}

/// Normalizes an optional shape payload: missing shapes become the empty
/// polygon, present shapes must decode as WKB.
pub fn normalize_shape(wkb: Option<&[u8]>) -> Result<Vec<u8>> {
    match wkb {
        Some(bytes) => {
            decode(bytes, "geography")?;
            Ok(bytes.to_vec())
        }
        None => Ok(EMPTY_POLYGON_WKB.to_vec()),
    }
}

/// Normalizes an optional internal-point payload.
pub fn normalize_point(wkb: Option<&[u8]>) -> Result<Vec<u8>> {
    match wkb {
        Some(bytes) => {
            decode(bytes, "internal point")?;
            Ok(bytes.to_vec())
        }
        None => Ok(EMPTY_POINT_WKB.to_vec()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Little-endian WKB for a polygon with one ring.
    pub(crate) fn polygon_wkb(ring: &[(f64, f64)]) -> Vec<u8> {
        let mut out = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        out.extend((ring.len() as u32).to_le_bytes());
        for (x, y) in ring {
            out.extend(x.to_le_bytes());
            out.extend(y.to_le_bytes());
        }
        out
    }

    pub(crate) fn unit_box_wkb() -> Vec<u8> {
        polygon_wkb(&[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)])
    }

    #[test]
    fn missing_shapes_collapse_to_one_hash() {
        let a = normalize_shape(None).unwrap();
        let b = normalize_shape(Some(&EMPTY_POLYGON_WKB)).unwrap();
        assert_eq!(geometry_hash(&a), geometry_hash(&b));
        assert_eq!(geometry_hash(&a), empty_polygon_hash());
    }

    #[test]
    fn distinct_shapes_hash_differently() {
        let unit = unit_box_wkb();
        let shifted = polygon_wkb(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0)]);
        assert_ne!(geometry_hash(&unit), geometry_hash(&shifted));
    }

    #[test]
    fn valid_wkb_round_trips() {
        let unit = unit_box_wkb();
        assert_eq!(normalize_shape(Some(&unit)).unwrap(), unit);
    }

    #[test]
    fn garbage_wkb_is_rejected() {
        assert!(normalize_shape(Some(&[0xde, 0xad, 0xbe, 0xef])).is_err());
        assert!(normalize_point(Some(&[0x00])).is_err());
    }

    #[test]
    fn hash_is_md5_sized() {
        assert_eq!(geometry_hash(&EMPTY_POINT_WKB).len(), 16);
    }
}
