use std::fmt;

use shakmaty::{Role, Square};

use crate::error::RulesError;

/// Side to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    White,
    Black,
}

impl Color {
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

impl From<shakmaty::Color> for Color {
    fn from(c: shakmaty::Color) -> Self {
        match c {
            shakmaty::Color::White => Self::White,
            shakmaty::Color::Black => Self::Black,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => f.write_str("white"),
            Self::Black => f.write_str("black"),
        }
    }
}

/// Piece a pawn may promote to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Promotion {
    Queen,
    Rook,
    Bishop,
    Knight,
}

impl Promotion {
    pub fn parse(s: &str) -> Result<Self, RulesError> {
        match s.to_ascii_lowercase().as_str() {
            "q" => Ok(Self::Queen),
            "r" => Ok(Self::Rook),
            "b" => Ok(Self::Bishop),
            "n" => Ok(Self::Knight),
            _ => Err(RulesError::InvalidPromotion(s.to_string())),
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::Queen => 'q',
            Self::Rook => 'r',
            Self::Bishop => 'b',
            Self::Knight => 'n',
        }
    }

    pub(crate) fn from_role(role: Role) -> Option<Self> {
        match role {
            Role::Queen => Some(Self::Queen),
            Role::Rook => Some(Self::Rook),
            Role::Bishop => Some(Self::Bishop),
            Role::Knight => Some(Self::Knight),
            Role::Pawn | Role::King => None,
        }
    }
}

/// A move as the clients express it: origin, destination, optional promotion.
///
/// Castling is written as the king's two-square move (`e1g1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChessMove {
    from: Square,
    to: Square,
    promotion: Option<Promotion>,
}

impl ChessMove {
    pub fn new(from: &str, to: &str, promotion: Option<&str>) -> Result<Self, RulesError> {
        Ok(Self {
            from: parse_square(from)?,
            to: parse_square(to)?,
            promotion: promotion.map(Promotion::parse).transpose()?,
        })
    }

    pub(crate) fn from_parts(from: Square, to: Square, promotion: Option<Promotion>) -> Self {
        Self {
            from,
            to,
            promotion,
        }
    }

    /// Parse UCI long algebraic notation, e.g. `e2e4` or `a7a8q`.
    pub fn from_uci(uci: &str) -> Result<Self, RulesError> {
        if !uci.is_ascii() || !(4..=5).contains(&uci.len()) {
            return Err(RulesError::IllegalMove(uci.to_string()));
        }
        let promotion = if uci.len() == 5 { Some(&uci[4..5]) } else { None };
        Self::new(&uci[0..2], &uci[2..4], promotion)
    }

    pub fn from_square(&self) -> String {
        self.from.to_string()
    }

    pub fn to_square(&self) -> String {
        self.to.to_string()
    }

    pub fn promotion(&self) -> Option<Promotion> {
        self.promotion
    }

    pub fn uci(&self) -> String {
        match self.promotion {
            Some(p) => format!("{}{}{}", self.from, self.to, p.as_char()),
            None => format!("{}{}", self.from, self.to),
        }
    }
}

impl fmt::Display for ChessMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uci())
    }
}

fn parse_square(s: &str) -> Result<Square, RulesError> {
    s.trim()
        .to_ascii_lowercase()
        .parse::<Square>()
        .map_err(|_| RulesError::InvalidSquare(s.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_from_parts() {
        let mv = ChessMove::new("e2", "e4", None).unwrap();
        assert_eq!(mv.uci(), "e2e4");
        assert_eq!(mv.from_square(), "e2");
        assert_eq!(mv.to_square(), "e4");

        let promo = ChessMove::new("a7", "A8", Some("Q")).unwrap();
        assert_eq!(promo.uci(), "a7a8q");
        assert_eq!(promo.promotion(), Some(Promotion::Queen));
    }

    #[test]
    fn rejects_bad_parts() {
        assert!(matches!(
            ChessMove::new("e9", "e4", None),
            Err(RulesError::InvalidSquare(_))
        ));
        assert!(matches!(
            ChessMove::new("a7", "a8", Some("k")),
            Err(RulesError::InvalidPromotion(_))
        ));
    }

    #[test]
    fn uci_parsing() {
        assert_eq!(ChessMove::from_uci("g1f3").unwrap().to_square(), "f3");
        assert_eq!(
            ChessMove::from_uci("b2b1n").unwrap().promotion(),
            Some(Promotion::Knight)
        );
        assert!(ChessMove::from_uci("e2").is_err());
        assert!(ChessMove::from_uci("e2e4qq").is_err());
    }

    #[test]
    fn color_opposite() {
        assert_eq!(Color::White.opposite(), Color::Black);
        assert_eq!(Color::Black.opposite(), Color::White);
    }
}
