//! Four-level path addressing (§3): object → object-instance → resource →
//! resource-instance, each a non-negative 16-bit ID.

use std::fmt;

/// Sentinel meaning "all" or "unassigned" depending on context.
pub const INVALID_ID: u16 = 65535;
/// Largest valid, non-sentinel ID.
pub const MAX_ID: u16 = 65534;

/// A path into the object tree. Each level beyond the first may be
/// `INVALID_ID`, meaning the path addresses everything at or above that
/// level (an object, an object-instance, or a whole resource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    pub object_id: u16,
    pub object_instance_id: u16,
    pub resource_id: u16,
    pub resource_instance_id: u16,
}

impl Path {
    pub const fn object(object_id: u16) -> Self {
        Path {
            object_id,
            object_instance_id: INVALID_ID,
            resource_id: INVALID_ID,
            resource_instance_id: INVALID_ID,
        }
    }

    pub const fn instance(object_id: u16, object_instance_id: u16) -> Self {
        Path {
            object_id,
            object_instance_id,
            resource_id: INVALID_ID,
            resource_instance_id: INVALID_ID,
        }
    }

    pub const fn resource(object_id: u16, object_instance_id: u16, resource_id: u16) -> Self {
        Path {
            object_id,
            object_instance_id,
            resource_id,
            resource_instance_id: INVALID_ID,
        }
    }

    pub const fn resource_instance(
        object_id: u16,
        object_instance_id: u16,
        resource_id: u16,
        resource_instance_id: u16,
    ) -> Self {
        Path {
            object_id,
            object_instance_id,
            resource_id,
            resource_instance_id,
        }
    }

    pub fn is_object(&self) -> bool {
        self.object_instance_id == INVALID_ID
    }

    pub fn is_instance(&self) -> bool {
        self.object_instance_id != INVALID_ID && self.resource_id == INVALID_ID
    }

    pub fn is_resource(&self) -> bool {
        self.resource_id != INVALID_ID && self.resource_instance_id == INVALID_ID
    }

    pub fn is_resource_instance(&self) -> bool {
        self.resource_instance_id != INVALID_ID
    }

    /// Parse a CoAP-style path such as `/10000/0/1` or `/1/0`. The root
    /// path `/` parses to the all-objects path (every field `INVALID_ID`).
    pub fn parse(s: &str) -> Result<Self, crate::error::CoreError> {
        let trimmed = s.trim().trim_start_matches('/').trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Path {
                object_id: INVALID_ID,
                object_instance_id: INVALID_ID,
                resource_id: INVALID_ID,
                resource_instance_id: INVALID_ID,
            });
        }
        let mut ids = [INVALID_ID; 4];
        let mut count = 0;
        for (i, segment) in trimmed.split('/').enumerate() {
            if i >= 4 {
                return Err(crate::error::CoreError::PathInvalid { path: s.to_string() });
            }
            ids[i] = segment
                .parse::<u16>()
                .map_err(|_| crate::error::CoreError::PathInvalid { path: s.to_string() })?;
            count += 1;
        }
        let _ = count;
        Ok(Path {
            object_id: ids[0],
            object_instance_id: ids[1],
            resource_id: ids[2],
            resource_instance_id: ids[3],
        })
    }

    /// Is this the sentinel "root" path (`/`), used only by the
    /// bootstrap-only `DELETE /` operation (§4.2 rule 4)?
    pub fn is_root(&self) -> bool {
        self.object_id == INVALID_ID
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return write!(f, "/");
        }
        write!(f, "/{}", self.object_id)?;
        if self.object_instance_id != INVALID_ID {
            write!(f, "/{}", self.object_instance_id)?;
        }
        if self.resource_id != INVALID_ID {
            write!(f, "/{}", self.resource_id)?;
        }
        if self.resource_instance_id != INVALID_ID {
            write!(f, "/{}", self.resource_instance_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_path() {
        let p = Path::parse("/10000/0/1/2").unwrap();
        assert_eq!(p, Path::resource_instance(10000, 0, 1, 2));
    }

    #[test]
    fn parses_root() {
        let p = Path::parse("/").unwrap();
        assert!(p.is_root());
    }

    #[test]
    fn rejects_too_many_segments() {
        assert!(Path::parse("/1/2/3/4/5").is_err());
    }

    #[test]
    fn display_round_trips_shape() {
        let p = Path::resource(1, 0, 7);
        assert_eq!(p.to_string(), "/1/0/7");
    }
}
