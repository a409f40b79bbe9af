pub mod absensi;
pub mod audit;
pub mod banding;
pub mod core;
pub mod guru;
pub mod jadwal;
pub mod kelas;
pub mod laporan;
pub mod promotion;
pub mod siswa;
