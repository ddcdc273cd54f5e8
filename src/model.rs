use std::fmt;

/// Half-day session a mark belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Session {
    Morning,
    Afternoon,
}

impl Session {
    /// Single-letter code used by grid edits ("M"/"A").
    pub fn from_code(code: &str) -> Option<Session> {
        match code {
            "M" => Some(Session::Morning),
            "A" => Some(Session::Afternoon),
            _ => None,
        }
    }

    pub fn from_db(s: &str) -> Option<Session> {
        match s {
            "MORNING" => Some(Session::Morning),
            "AFTERNOON" => Some(Session::Afternoon),
            _ => None,
        }
    }

    pub fn as_db(self) -> &'static str {
        match self {
            Session::Morning => "MORNING",
            Session::Afternoon => "AFTERNOON",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db())
    }
}

/// Persisted mark for one cell.
///
/// A cell with no record is implicitly present: only explicit marks
/// produce rows, and clearing a cell deletes its row. Present exists
/// in the domain for the single-record endpoints but never flows
/// through the grid path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttendanceStatus {
    Present,
    Absent,
    Permission,
    Late,
    Excused,
    Sick,
}

impl AttendanceStatus {
    pub fn from_db(s: &str) -> Option<AttendanceStatus> {
        match s {
            "PRESENT" => Some(AttendanceStatus::Present),
            "ABSENT" => Some(AttendanceStatus::Absent),
            "PERMISSION" => Some(AttendanceStatus::Permission),
            "LATE" => Some(AttendanceStatus::Late),
            "EXCUSED" => Some(AttendanceStatus::Excused),
            "SICK" => Some(AttendanceStatus::Sick),
            _ => None,
        }
    }

    pub fn as_db(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "PRESENT",
            AttendanceStatus::Absent => "ABSENT",
            AttendanceStatus::Permission => "PERMISSION",
            AttendanceStatus::Late => "LATE",
            AttendanceStatus::Excused => "EXCUSED",
            AttendanceStatus::Sick => "SICK",
        }
    }

    /// Grid edit value ("A", "P", "" = clear). Anything else clears.
    pub fn from_grid_value(value: &str) -> Option<AttendanceStatus> {
        match value {
            "A" => Some(AttendanceStatus::Absent),
            "P" => Some(AttendanceStatus::Permission),
            _ => None,
        }
    }

    /// Glyph shown in a grid cell.
    pub fn display_value(self) -> &'static str {
        match self {
            AttendanceStatus::Absent => "A",
            AttendanceStatus::Permission => "P",
            _ => "",
        }
    }
}

/// Composite key identifying one grid cell within a class/month.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub student_id: String,
    pub day: u32,
    pub session: Session,
}

/// Attendance row as read back from the store.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub id: String,
    pub student_id: String,
    pub day: u32,
    pub session: Session,
    pub status: AttendanceStatus,
}
