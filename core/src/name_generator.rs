//! Deterministic client names for demo data and replays.
//!
//! Mexican naming: given name, paternal surname, maternal surname.
//! Same RNG stream = same names.

use crate::rng::DeskRng;

/// A generated person, split the way `NewClient` wants it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedName {
    pub first_name: &'static str,
    pub paternal_surname: &'static str,
    pub maternal_surname: &'static str,
}

impl GeneratedName {
    pub fn full_name(&self) -> String {
        format!("{} {} {}", self.first_name, self.paternal_surname, self.maternal_surname)
    }
}

pub struct NameGenerator;

impl NameGenerator {
    pub fn generate(rng: &mut DeskRng) -> GeneratedName {
        GeneratedName {
            first_name: Self::pick(rng, Self::first_names()),
            paternal_surname: Self::pick(rng, Self::surnames()),
            maternal_surname: Self::pick(rng, Self::surnames()),
        }
    }

    pub fn generate_full_name(rng: &mut DeskRng) -> String {
        Self::generate(rng).full_name()
    }

    /// Ten-digit local phone number in the 55 area.
    pub fn generate_phone(rng: &mut DeskRng) -> String {
        format!("55{:08}", rng.next_u64_below(100_000_000))
    }

    fn pick(rng: &mut DeskRng, names: &'static [&'static str]) -> &'static str {
        rng.pick(names).copied().unwrap_or("Cliente")
    }

    fn first_names() -> &'static [&'static str] {
        &[
            "José", "María", "Juan", "Guadalupe", "Luis", "Ana", "Carlos", "Verónica",
            "Miguel", "Patricia", "Jorge", "Alejandra", "Francisco", "Gabriela", "Fernando",
            "Adriana", "Ricardo", "Claudia", "Alejandro", "Mónica", "Roberto", "Laura",
            "Eduardo", "Leticia", "Arturo", "Sofía", "Héctor", "Daniela", "Raúl", "Rosa",
            "Sergio", "Fernanda", "Javier", "Lucía", "Manuel", "Valeria", "Óscar", "Paola",
        ]
    }

    fn surnames() -> &'static [&'static str] {
        &[
            "Hernández", "García", "Martínez", "López", "González", "Pérez", "Rodríguez",
            "Sánchez", "Ramírez", "Cruz", "Flores", "Gómez", "Morales", "Vázquez", "Reyes",
            "Jiménez", "Torres", "Díaz", "Gutiérrez", "Ruiz", "Mendoza", "Aguilar", "Ortiz",
            "Moreno", "Castillo", "Romero", "Álvarez", "Méndez", "Chávez", "Rivera", "Juárez",
            "Ramos", "Domínguez", "Herrera", "Medina", "Castro", "Vargas", "Guzmán",
        ]
    }
}
